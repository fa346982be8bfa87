//! Signed certificate acquisition
//!
//! [`SecureBootstrap::acquire_signed_certificate`] runs the whole exchange for one content
//! item, strictly in order:
//!
//! 1. generate a key pair and CSR,
//! 2. store `<uuid>.key` and `<uuid>.csr` in the workspace,
//! 3. POST `token`, `cert_req` and `info_hash` to the signing service, retrying transient
//!    transport failures, with the response stored as `<uuid>.crt` (the [`HttpClient`]
//!    checks the signing URL against its allow-list before sending),
//! 4. verify that the stored certificate is non-empty, parses, and certifies the key.
//!
//! A failure leaves no certificate file behind. Whether it ends the process is up to the
//! [`FailurePolicy`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use openssl::x509::X509;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::error::BootstrapError;
use crate::failure::FailurePolicy;
use crate::http_client::{HttpClient, HttpRequest, RetryPolicy};
use crate::key_material::{KeyMaterial, RsaCsrBuilder, RSA_KEY_SIZE_DEFAULT};
use crate::workspace::Workspace;

/// Info-hash of one transferable item, as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    /// Accepts 20-byte (SHA-1) and 32-byte (SHA-256) hashes written as hex, any case.
    pub fn from_hex(value: &str) -> Result<Self, BootstrapError> {
        let trimmed = value.trim();
        let bytes = hex::decode(trimmed).map_err(|e| BootstrapError::InvalidFingerprint {
            value: value.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_bytes(&bytes).map_err(|_| BootstrapError::InvalidFingerprint {
            value: value.to_string(),
            reason: format!("expected 20 or 32 bytes, got {}", bytes.len()),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BootstrapError> {
        match bytes.len() {
            20 | 32 => Ok(Self(hex::encode(bytes))),
            n => Err(BootstrapError::InvalidFingerprint {
                value: hex::encode(bytes),
                reason: format!("expected 20 or 32 bytes, got {}", n),
            }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Artifacts of a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCertificate {
    pub uuid: String,
    /// PEM certificate issued by the signing authority.
    pub path: PathBuf,
    pub key_path: PathBuf,
    pub csr_path: PathBuf,
}

pub struct SecureBootstrap {
    workspace: Arc<Workspace>,
    http: HttpClient,
    credential: Arc<Credential>,
    failure: FailurePolicy,
    retry: RetryPolicy,
    key_size: u32,
}

impl SecureBootstrap {
    pub fn new(
        http: HttpClient,
        credential: Arc<Credential>,
        failure: FailurePolicy,
    ) -> Self {
        Self {
            workspace: Arc::clone(http.workspace()),
            http,
            credential,
            failure,
            retry: RetryPolicy::csr_signing(),
            key_size: RSA_KEY_SIZE_DEFAULT,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_key_size(mut self, bits: u32) -> Self {
        self.key_size = bits;
        self
    }

    /// Obtain a certificate binding a fresh key to `fingerprint`.
    ///
    /// `content_identifier` names the item in log messages. Failures go through the
    /// failure policy: interactive runs exit, server runs get the error back.
    pub fn acquire_signed_certificate(
        &self,
        content_identifier: &str,
        fingerprint: &ContentFingerprint,
        signing_url: &str,
        uuid: &str,
    ) -> Result<SignedCertificate, BootstrapError> {
        self.acquire(content_identifier, fingerprint, signing_url, uuid)
            .map_err(|e| self.failure.escalate(e))
    }

    pub(crate) fn acquire(
        &self,
        content_identifier: &str,
        fingerprint: &ContentFingerprint,
        signing_url: &str,
        uuid: &str,
    ) -> Result<SignedCertificate, BootstrapError> {
        let key_path = self.workspace.key_path(uuid)?;
        let csr_path = self.workspace.csr_path(uuid)?;
        let cert_path = self.workspace.cert_path(uuid)?;

        let (key, csr) = RsaCsrBuilder::new().key_size(self.key_size).build()?;
        self.workspace.write_private(&key_path, key.private_key_pem())?;
        self.workspace.write_private(&csr_path, csr.as_bytes())?;
        debug!(uuid, csr = %csr_path.display(), "Generated key and CSR");

        let request = HttpRequest::multipart(signing_url)
            .text_field("token", self.credential.expose())
            .text_field("cert_req", csr.as_str())
            .text_field("info_hash", fingerprint.as_str());
        let context = format!(
            "Problem communicating with the signing service while attempting a CSR signing transaction for UUID: {}",
            uuid
        );

        let signed = self
            .http
            .perform(&request, self.retry, Some(&cert_path), &context)
            .and_then(|_| verify_certificate(&cert_path, &key));
        if let Err(e) = signed {
            discard(&cert_path);
            return Err(e);
        }

        info!(content = content_identifier, uuid, "Acquired signed certificate");
        Ok(SignedCertificate {
            uuid: uuid.to_string(),
            path: cert_path,
            key_path,
            csr_path,
        })
    }
}

impl fmt::Debug for SecureBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureBootstrap")
            .field("workspace", &self.workspace.path())
            .field("http", &self.http)
            .field("retry", &self.retry)
            .field("key_size", &self.key_size)
            .finish_non_exhaustive()
    }
}

fn verify_certificate(path: &Path, key: &KeyMaterial) -> Result<(), BootstrapError> {
    let unusable = |reason: String| BootstrapError::InvalidCertificate {
        path: path.to_path_buf(),
        reason,
    };

    let pem = std::fs::read(path).map_err(|e| unusable(e.to_string()))?;
    if pem.iter().all(u8::is_ascii_whitespace) {
        return Err(unusable("empty response".to_string()));
    }
    let cert = X509::from_pem(&pem).map_err(|e| unusable(format!("not a PEM certificate: {}", e)))?;
    let public_key = cert
        .public_key()
        .map_err(|e| unusable(format!("no public key: {}", e)))?;
    if !key.matches_public_key(&public_key) {
        return Err(unusable("certificate does not match the generated key".to_string()));
    }
    Ok(())
}

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed unusable certificate file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove certificate file"),
    }
}
