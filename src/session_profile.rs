//! Built-in session tuning
//!
//! A session is configured in three passes: the tuning below, then the `GT_SESSION_*`
//! overrides, then the explicit bind settings from the runtime configuration. Later passes
//! win.

use std::net::IpAddr;

use serde::Deserialize;
use tracing::debug;

use crate::error::BootstrapError;
use crate::failure::OperatingMode;
use crate::overrides::{apply_overrides, EnvSource};
use crate::session_settings::{SessionSettings, MIXED_MODE_PREFER_TCP};

const REQUEST_QUEUE_DEPTH: i32 = 1000;
const MAX_QUEUED_DISK_BYTES: i32 = 256 * 1024 * 1024;
const SERVER_SEND_BUFFER_WATERMARK: i32 = 256 * 1024 * 1024;
const SERVER_SEND_BUFFER_WATERMARK_FACTOR: i32 = 150;
const ALERT_QUEUE_SIZE: i32 = 10_000;

/// Listener-facing settings from the `[session]` configuration section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BindSettings {
    /// Difference between the bound port and the port advertised to trackers.
    #[serde(default)]
    pub exposed_port_delta: i32,
    /// Address announced to trackers instead of the local one.
    #[serde(default)]
    pub announce_ip: Option<IpAddr>,
    /// Peer timeout in seconds; ignored unless positive.
    #[serde(default)]
    pub peer_timeout: i32,
}

#[derive(Debug, Clone)]
pub struct SessionProfile {
    mode: OperatingMode,
    allow_list_configured: bool,
    bind: BindSettings,
}

impl SessionProfile {
    pub fn new(mode: OperatingMode, allow_list_configured: bool) -> Self {
        Self {
            mode,
            allow_list_configured,
            bind: BindSettings::default(),
        }
    }

    pub fn with_bind(mut self, bind: BindSettings) -> Self {
        self.bind = bind;
        self
    }

    /// Settings for a new session: tuning, then environment overrides, then bind settings.
    pub fn build(&self, env: &dyn EnvSource) -> Result<SessionSettings, BootstrapError> {
        let mut settings = SessionSettings::default();
        self.tune(&mut settings);
        let applied = apply_overrides(&mut settings, env)?;
        debug!(count = applied.len(), "Applied session overrides");
        self.bind(&mut settings);
        Ok(settings)
    }

    pub fn tune(&self, settings: &mut SessionSettings) {
        let server = self.mode == OperatingMode::Server;

        settings.allow_multiple_connections_per_ip = true;
        settings.max_allowed_in_request_queue = REQUEST_QUEUE_DEPTH;
        settings.max_out_request_queue = REQUEST_QUEUE_DEPTH;
        settings.mixed_mode_algorithm = MIXED_MODE_PREFER_TCP;
        settings.enable_outgoing_utp = false;
        settings.enable_incoming_utp = false;
        settings.apply_ip_filter_to_trackers = !server && self.allow_list_configured;
        settings.no_atime_storage = false;
        settings.max_queued_disk_bytes = MAX_QUEUED_DISK_BYTES;
        // Multiplied by the attempt number on each reconnect.
        settings.min_reconnect_time = 3;
        settings.min_announce_interval = 2;
        if !server {
            settings.inhibit_keepalives = true;
        }
        settings.alert_queue_size = ALERT_QUEUE_SIZE;

        if server {
            settings.send_buffer_watermark = SERVER_SEND_BUFFER_WATERMARK;
            settings.send_buffer_watermark_factor = SERVER_SEND_BUFFER_WATERMARK_FACTOR;
            // Peers that fail once are not retried; they may reconnect to us.
            settings.max_failcount = 1;
        }
    }

    pub fn bind(&self, settings: &mut SessionSettings) {
        if self.bind.exposed_port_delta != 0 {
            settings.external_port_delta = self.bind.exposed_port_delta;
        }
        if let Some(ip) = self.bind.announce_ip {
            settings.announce_ip = ip.to_string();
        }
        if self.bind.peer_timeout > 0 {
            settings.peer_timeout = self.bind.peer_timeout;
        }
    }
}
