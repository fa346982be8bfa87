use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::access_policy::AllowListRule;
use crate::failure::OperatingMode;
use crate::log_sink::LogMask;
use crate::session_profile::BindSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub signing: SigningConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub session: BindSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SigningConfig {
    /// WSI endpoint that signs CSRs.
    pub csr_signing_url: String,
    /// Credential file path, or an http(s) URI to download the token from. ftp(s) URIs are rejected.
    pub credential: String,
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
}

fn default_verify_tls() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AccessConfig {
    /// CIDR blocks, `first-last` ranges or single addresses. Empty means unrestricted.
    #[serde(default)]
    pub allowed_servers: Vec<AllowListRule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub mode: OperatingMode,
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
    #[serde(default = "default_log_mask")]
    pub log_mask: LogMask,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::default(),
            verbosity: default_verbosity(),
            log_mask: default_log_mask(),
            log_file: None,
        }
    }
}

fn default_verbosity() -> u8 {
    1
}

fn default_log_mask() -> LogMask {
    LogMask::TRANSPORT_CALLBACK
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        Self::from_toml(&config_str).context(format!("Failed to parse config file: {}", path))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(text)?;
        if config.signing.csr_signing_url.trim().is_empty() {
            anyhow::bail!("signing.csr_signing_url must not be empty");
        }
        Ok(config)
    }

    /// Load configuration with default path (bootstrap.toml)
    pub fn load() -> Result<Self> {
        Self::from_file("bootstrap.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [signing]
            csr_signing_url = "https://wsi.example.org/cghub/security/csr_sign"
            credential = "/etc/swarm/credential.key"
            "#,
        )
        .unwrap();
        assert!(config.signing.verify_tls);
        assert!(config.access.allowed_servers.is_empty());
        assert_eq!(config.runtime.mode, OperatingMode::Interactive);
        assert_eq!(config.runtime.verbosity, 1);
        assert_eq!(config.runtime.log_mask, LogMask::TRANSPORT_CALLBACK);
        assert_eq!(config.session, BindSettings::default());
    }

    #[test]
    fn test_full_config() {
        let config = AppConfig::from_toml(
            r#"
            [signing]
            csr_signing_url = "https://wsi.example.org/sign"
            credential = "https://wsi.example.org/token"
            verify_tls = false

            [access]
            allowed_servers = ["10.0.0.0/8", "192.0.2.1-192.0.2.9", "2001:db8::1"]

            [runtime]
            mode = "server"
            verbosity = 3
            log_mask = 0
            log_file = "/var/log/swarm-bootstrap.log"

            [session]
            exposed_port_delta = 10
            announce_ip = "203.0.113.4"
            peer_timeout = 45
            "#,
        )
        .unwrap();
        assert!(!config.signing.verify_tls);
        assert_eq!(config.access.allowed_servers.len(), 3);
        assert!(config.access.allowed_servers[1].contains("192.0.2.5".parse().unwrap()));
        assert_eq!(config.runtime.mode, OperatingMode::Server);
        assert_eq!(config.runtime.log_mask, LogMask::NONE);
        assert_eq!(
            config.runtime.log_file,
            Some(PathBuf::from("/var/log/swarm-bootstrap.log"))
        );
        assert_eq!(config.session.peer_timeout, 45);
        assert_eq!(config.session.announce_ip, Some("203.0.113.4".parse().unwrap()));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad_rule = r#"
            [signing]
            csr_signing_url = "https://wsi.example.org/sign"
            credential = "cred"
            [access]
            allowed_servers = ["10.0.0.0/40"]
        "#;
        assert!(AppConfig::from_toml(bad_rule).is_err());

        let bad_ip = r#"
            [signing]
            csr_signing_url = "https://wsi.example.org/sign"
            credential = "cred"
            [session]
            announce_ip = "not-an-ip"
        "#;
        assert!(AppConfig::from_toml(bad_ip).is_err());

        let empty_url = r#"
            [signing]
            csr_signing_url = " "
            credential = "cred"
        "#;
        assert!(AppConfig::from_toml(empty_url).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(AppConfig::from_file("/nonexistent/bootstrap.toml").is_err());
    }
}
