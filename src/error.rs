//! Error taxonomy for the bootstrap layer
//!
//! Every failure the bootstrap layer can produce is a [`BootstrapError`]. Each variant belongs
//! to exactly one category, and each category owns exactly one process exit code (see
//! [`exit_code`]). Whether a failure terminates the process or is handed back to the caller
//! is decided by [`crate::failure::FailurePolicy`], never by the code that detected it.

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::error_response::ServiceErrorReport;

/// Fixed process exit codes, one per failure category.
pub mod exit_code {
    /// A web-service transaction failed at the transport level.
    pub const TRANSPORT: i32 = 1;
    /// Invalid configuration or settings override.
    pub const CONFIGURATION: i32 = 9;
    /// Credential file missing or not readable.
    pub const CREDENTIAL_MISSING: i32 = 55;
    /// Credential file present but holds no token.
    pub const CREDENTIAL_EMPTY: i32 = 56;
    /// WSI URL rejected by the address allow-list.
    pub const ACCESS_POLICY: i32 = 59;
    /// Credential could not be downloaded from its URI.
    pub const CREDENTIAL_URI: i32 = 65;
    /// Temporary workspace could not be created.
    pub const WORKSPACE: i32 = 66;
    /// Content fingerprint is not a valid info-hash.
    pub const CONTENT: i32 = 87;
    /// HTTP client could not be initialised.
    pub const HTTP_CLIENT: i32 = 201;
    /// Generic filesystem failure.
    pub const IO: i32 = 202;
    /// Non-200 HTTP status, with or without a structured service error.
    pub const HTTP: i32 = 203;
    /// OpenSSL failure while generating key material or a CSR.
    pub const CRYPTO: i32 = 204;
    /// The signing authority answered, but not with a usable certificate.
    pub const CERTIFICATE: i32 = 205;
}

/// Transport-level failure classes, independent of the HTTP client in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// TCP connection could not be established.
    Connect,
    /// Connection established but TLS negotiation failed.
    TlsConnect,
    /// Connect or total timeout elapsed.
    Timeout,
    /// Redirect limit exceeded or redirect loop.
    Redirect,
    /// Request could not be built or sent.
    Request,
    /// Response body could not be read.
    Body,
    Other,
}

impl TransportErrorKind {
    /// Only TLS negotiation failures and timeouts are worth retrying; both usually mean the
    /// remote end is temporarily overloaded.
    pub fn is_transient(self) -> bool {
        matches!(self, TransportErrorKind::TlsConnect | TransportErrorKind::Timeout)
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransportErrorKind::Connect => "could not connect",
            TransportErrorKind::TlsConnect => "TLS negotiation failed",
            TransportErrorKind::Timeout => "operation timed out",
            TransportErrorKind::Redirect => "too many redirects",
            TransportErrorKind::Request => "request error",
            TransportErrorKind::Body => "error reading response body",
            TransportErrorKind::Other => "transport error",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("{context}.  Additional Info:  {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}:  {source}")]
    Crypto {
        context: String,
        #[source]
        source: openssl::error::ErrorStack,
    },

    #[error("{context}  URL:  {url}.  Additional Info:  {kind}: {message} (after {attempts} attempt(s))")]
    Transport {
        context: String,
        url: String,
        kind: TransportErrorKind,
        message: String,
        attempts: u32,
    },

    #[error("{context}  URL:  {url}.  Additional Info:  {reason} (HTTP status code = {status})")]
    HttpStatus {
        context: String,
        url: String,
        status: u16,
        reason: String,
    },

    #[error("Error:  {report}")]
    Service {
        report: ServiceErrorReport,
        retryable: bool,
    },

    #[error("Bad URL given for WSI call. Could not extract hostname from URL: {url}.")]
    InvalidUrl { url: String },

    #[error("IP address of server in WSI call is outside of the allowed server range on this system.  Host: {host} ({address})")]
    AccessDenied { host: String, address: IpAddr },

    #[error("Unable to resolve WSI host {host} for allow-list verification: {reason}")]
    Unresolvable { host: String, reason: String },

    #[error("{0}")]
    Config(String),

    #[error("credentials file not found (or is not readable):  {}", path.display())]
    CredentialMissing { path: PathBuf },

    #[error("credentials file contains no token:  {}", path.display())]
    CredentialEmpty { path: PathBuf },

    #[error("Failed to download authentication token from provided URI {url}: {reason}")]
    CredentialFetch { url: String, reason: String },

    #[error("Could not create temporary workspace: {0}")]
    Workspace(String),

    #[error("Invalid content fingerprint '{value}': {reason}")]
    InvalidFingerprint { value: String, reason: String },

    #[error("Invalid artifact identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("HTTP client initialization failure: {0}")]
    HttpClientInit(#[source] reqwest::Error),

    #[error("Signed certificate {} is unusable: {reason}", path.display())]
    InvalidCertificate { path: PathBuf, reason: String },
}

impl BootstrapError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        BootstrapError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn crypto(context: impl Into<String>, source: openssl::error::ErrorStack) -> Self {
        BootstrapError::Crypto {
            context: context.into(),
            source,
        }
    }

    /// The exit code reserved for this error's category.
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::Io { .. } => exit_code::IO,
            BootstrapError::Crypto { .. } => exit_code::CRYPTO,
            BootstrapError::Transport { .. } => exit_code::TRANSPORT,
            BootstrapError::HttpStatus { .. } | BootstrapError::Service { .. } => exit_code::HTTP,
            BootstrapError::InvalidUrl { .. }
            | BootstrapError::AccessDenied { .. }
            | BootstrapError::Unresolvable { .. } => exit_code::ACCESS_POLICY,
            BootstrapError::Config(_) | BootstrapError::InvalidIdentifier(_) => {
                exit_code::CONFIGURATION
            }
            BootstrapError::CredentialMissing { .. } => exit_code::CREDENTIAL_MISSING,
            BootstrapError::CredentialEmpty { .. } => exit_code::CREDENTIAL_EMPTY,
            BootstrapError::CredentialFetch { .. } => exit_code::CREDENTIAL_URI,
            BootstrapError::Workspace(_) => exit_code::WORKSPACE,
            BootstrapError::InvalidFingerprint { .. } => exit_code::CONTENT,
            BootstrapError::HttpClientInit(_) => exit_code::HTTP_CLIENT,
            BootstrapError::InvalidCertificate { .. } => exit_code::CERTIFICATE,
        }
    }

    /// Whether another attempt at the same transaction could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BootstrapError::Transport { kind, .. } => kind.is_transient(),
            BootstrapError::Service { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Configuration and access-policy errors are fatal in every operating mode.
    pub fn is_always_fatal(&self) -> bool {
        matches!(
            self.exit_code(),
            exit_code::CONFIGURATION | exit_code::ACCESS_POLICY
        )
    }
}
