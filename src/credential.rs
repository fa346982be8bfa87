//! Authentication token used on every signing request
//!
//! The token is loaded once at startup, either from a local credential file or by
//! downloading it from a URI, and kept in a [`SecretString`] for the rest of the process.

use std::fmt;
use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::error::{exit_code, BootstrapError};
use crate::http_client::HttpClient;

const URI_SCHEMES: [&str; 4] = ["http://", "https://", "ftp://", "ftps://"];
// Recognized as URIs so they are not mistaken for file names, but not fetchable.
const UNSUPPORTED_SCHEMES: [&str; 2] = ["ftp://", "ftps://"];

/// Immutable authentication token.
pub struct Credential {
    token: SecretString,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }

    /// Load from `source`, a credential file path or a URI to download from.
    ///
    /// URIs are fetched with a single GET through `http`, which applies the allow-list; the
    /// trimmed body is the token. Only http and https URIs can be downloaded. Files
    /// contribute their first whitespace-delimited word.
    pub fn load(source: &str, http: &HttpClient) -> Result<Self, BootstrapError> {
        if is_uri(source) {
            Self::fetch(source, http)
        } else {
            Self::from_file(Path::new(source))
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, BootstrapError> {
        let contents = std::fs::read_to_string(path).map_err(|_| {
            BootstrapError::CredentialMissing {
                path: path.to_path_buf(),
            }
        })?;
        match contents.split_whitespace().next() {
            Some(token) => {
                info!(path = %path.display(), "Loaded credential file");
                Ok(Self::new(token))
            }
            None => Err(BootstrapError::CredentialEmpty {
                path: path.to_path_buf(),
            }),
        }
    }

    fn fetch(url: &str, http: &HttpClient) -> Result<Self, BootstrapError> {
        if has_scheme(url, &UNSUPPORTED_SCHEMES) {
            return Err(BootstrapError::CredentialFetch {
                url: url.to_string(),
                reason: "ftp and ftps credential URIs are not supported, use http or https"
                    .to_string(),
            });
        }

        let body = http
            .get(url, "Failed to download authentication token")
            .map_err(|e| {
                // Allow-list violations keep their own exit code.
                if e.exit_code() == exit_code::ACCESS_POLICY {
                    e
                } else {
                    BootstrapError::CredentialFetch {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let token = String::from_utf8(body).map_err(|_| BootstrapError::CredentialFetch {
            url: url.to_string(),
            reason: "token is not valid UTF-8".to_string(),
        })?;
        let token = token.trim();
        if token.is_empty() {
            return Err(BootstrapError::CredentialFetch {
                url: url.to_string(),
                reason: "server returned an empty token".to_string(),
            });
        }
        info!(url, "Downloaded credential");
        Ok(Self::new(token))
    }

    pub fn expose(&self) -> &str {
        self.token.expose_secret()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .finish()
    }
}

fn is_uri(source: &str) -> bool {
    has_scheme(source, &URI_SCHEMES)
}

fn has_scheme(source: &str, schemes: &[&str]) -> bool {
    let lower = source.to_ascii_lowercase();
    schemes.iter().any(|scheme| lower.starts_with(scheme))
}
