//! Swarm Bootstrap driver
//!
//! Prepares one content item for transfer: loads the runtime configuration, builds the
//! session settings (tuning, `GT_SESSION_*` overrides, bind settings) and obtains a signed
//! certificate for the item.
//!
//! ```bash
//! swarm-bootstrap [config.toml] <uuid> <info-hash-hex>
//! ```
//!
//! Without a config path, `bootstrap.toml` in the working directory is used.

use anyhow::{Context, Result};
use std::sync::Arc;
use swarm_bootstrap::access_policy::AccessPolicy;
use swarm_bootstrap::bootstrap::{ContentFingerprint, SecureBootstrap};
use swarm_bootstrap::configs::AppConfig;
use swarm_bootstrap::credential::Credential;
use swarm_bootstrap::failure::FailurePolicy;
use swarm_bootstrap::http_client::{HttpClient, ReqwestTransport};
use swarm_bootstrap::log_sink::{CallbackLogSink, SinkRegistry};
use swarm_bootstrap::logging::init_logging;
use swarm_bootstrap::overrides::ProcessEnv;
use swarm_bootstrap::session_profile::SessionProfile;
use swarm_bootstrap::workspace::Workspace;

const USAGE: &str = "usage: swarm-bootstrap [config.toml] <uuid> <info-hash-hex>";

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config, uuid, info_hash) = match args.as_slice() {
        [config, uuid, hash] => (AppConfig::from_file(config)?, uuid.as_str(), hash.as_str()),
        [uuid, hash] => (AppConfig::load()?, uuid.as_str(), hash.as_str()),
        _ => anyhow::bail!(USAGE),
    };

    init_logging(config.runtime.verbosity, config.runtime.log_file.as_deref())?;
    let failure = FailurePolicy::new(config.runtime.mode);
    println!("=== Swarm Bootstrap ({:?} mode) ===\n", config.runtime.mode);

    let workspace = match Workspace::create() {
        Ok(workspace) => Arc::new(workspace),
        Err(e) => failure.fatal(e),
    };
    println!("✓ Workspace ready at {}", workspace.path().display());

    let transport = match ReqwestTransport::new(config.signing.verify_tls) {
        Ok(transport) => Arc::new(transport),
        Err(e) => failure.fatal(e),
    };
    let access = AccessPolicy::new(config.access.allowed_servers.clone());
    let restricted = access.is_restricted();
    if restricted {
        println!("✓ Allow-list active ({} rules)", access.rules().len());
    }
    let http = HttpClient::new(transport, Arc::clone(&workspace), access, failure);

    let credential = match Credential::load(&config.signing.credential, &http) {
        Ok(credential) => Arc::new(credential),
        Err(e) => failure.fatal(e),
    };
    println!("✓ Credential loaded");

    let settings = match SessionProfile::new(config.runtime.mode, restricted)
        .with_bind(config.session.clone())
        .build(&ProcessEnv)
    {
        Ok(settings) => settings,
        Err(e) => failure.fatal(e),
    };
    println!(
        "✓ Session settings prepared (user agent {:?}, peer timeout {}s)",
        settings.user_agent, settings.peer_timeout
    );

    let sink = Arc::new(CallbackLogSink::new(config.runtime.log_mask));
    let handle = SinkRegistry::global().register(sink);

    let fingerprint = match ContentFingerprint::from_hex(info_hash) {
        Ok(fingerprint) => fingerprint,
        Err(e) => failure.fatal(e),
    };
    let bootstrap = SecureBootstrap::new(http, credential, failure);
    let result = bootstrap.acquire_signed_certificate(
        uuid,
        &fingerprint,
        &config.signing.csr_signing_url,
        uuid,
    );
    SinkRegistry::global().unregister(handle);

    let signed = result.context(format!("Failed to acquire certificate for {}", uuid))?;
    println!("✓ Signed certificate written to {}", signed.path.display());
    println!("✓ Private key at {}", signed.key_path.display());
    if !workspace.is_preserved() {
        println!("  (workspace is removed on exit; set GENETORRENT_DEVMODE to keep it)");
    }
    Ok(())
}
