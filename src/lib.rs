//! Swarm Bootstrap - secure session bootstrap for a peer-to-peer bulk transfer client
//!
//! Before a transfer session starts, each content item needs a certificate that binds a
//! freshly generated key pair to the item's fingerprint. This library produces the key and
//! CSR, has the CSR signed by a remote web service over an allow-listed HTTPS connection,
//! and prepares the transport session settings.
//!
//! # Flow
//!
//! ```text
//! Workspace ──► RsaCsrBuilder ──► HttpClient::perform (AccessPolicy::check) ──► Transport
//!                                                  │
//!            error_response (CGHUB_error XML) ◄────┘ non-200
//! ```
//!
//! # Modules
//!
//! - [`bootstrap`]: per-item signing flow with retry on transient transport failures
//! - [`http_client`]: blocking transaction client over a pluggable [`http_client::Transport`]
//! - [`error_response`]: parsing of structured service error documents
//! - [`access_policy`]: address allow-list for outbound service calls
//! - [`session_settings`] and [`overrides`]: the `GT_SESSION_*` override catalog
//! - [`session_profile`]: built-in tuning, overrides and bind settings in order
//! - [`log_sink`]: line assembly for the transport engine's logging callback
//! - [`workspace`]: private temporary directory for keys, CSRs and certificates
//! - [`configs`], [`logging`], [`failure`], [`error`]: runtime plumbing
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use swarm_bootstrap::access_policy::AccessPolicy;
//! use swarm_bootstrap::bootstrap::{ContentFingerprint, SecureBootstrap};
//! use swarm_bootstrap::credential::Credential;
//! use swarm_bootstrap::failure::{FailurePolicy, OperatingMode};
//! use swarm_bootstrap::http_client::{HttpClient, ReqwestTransport};
//! use swarm_bootstrap::workspace::Workspace;
//!
//! fn main() -> anyhow::Result<()> {
//!     let failure = FailurePolicy::new(OperatingMode::Server);
//!     let workspace = Arc::new(Workspace::create()?);
//!     let transport = Arc::new(ReqwestTransport::new(true)?);
//!     let access = AccessPolicy::unrestricted();
//!     let http = HttpClient::new(transport, workspace, access, failure);
//!     let credential = Arc::new(Credential::load("/etc/swarm/credential", &http)?);
//!
//!     let bootstrap = SecureBootstrap::new(http, credential, failure);
//!     let fingerprint = ContentFingerprint::from_hex("0123456789abcdef0123456789abcdef01234567")?;
//!     let signed = bootstrap.acquire_signed_certificate(
//!         "item-1",
//!         &fingerprint,
//!         "https://wsi.example.org/cghub/security/csr_sign",
//!         "5e9b3a7c-0000-4000-8000-000000000001",
//!     )?;
//!     println!("certificate at {}", signed.path.display());
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Library operations return [`error::BootstrapError`]; each variant maps to a process exit
//! code through [`error::BootstrapError::exit_code`]. Whether a failure ends the process or
//! is handed back is decided by [`failure::FailurePolicy`].

pub mod access_policy;
pub mod bootstrap;
pub mod configs;
pub mod credential;
pub mod error;
pub mod error_response;
pub mod failure;
pub mod http_client;
pub mod key_material;
pub mod log_sink;
pub mod logging;
pub mod overrides;
pub mod session_profile;
pub mod session_settings;
pub mod workspace;

#[cfg(test)]
mod test_support;
