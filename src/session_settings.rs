//! Transport session configuration and its override catalog
//!
//! [`SessionSettings`] mirrors the tuning knobs of the swarm engine's session. Every field
//! has a fixed `GT_SESSION_*` environment variable and a declared [`SettingKind`]; the
//! pairing lives in one declarative table from which both the struct and [`CATALOG`] are
//! generated, so a field cannot exist without its override entry or the other way round.

use std::fmt;

/// `mixed_mode_algorithm`: prefer TCP and throttle uTP.
pub const MIXED_MODE_PREFER_TCP: i32 = 0;
/// `mixed_mode_algorithm`: share bandwidth in proportion to peer counts.
pub const MIXED_MODE_PEER_PROPORTIONAL: i32 = 1;

/// Value types an override may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Integer,
    Float,
    /// Exactly `0` or `1`.
    Boolean,
    /// Exactly one byte.
    Character,
    String,
    /// Written as the integer representation.
    Enumerated,
}

impl fmt::Display for SettingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettingKind::Integer => "int",
            SettingKind::Float => "float",
            SettingKind::Boolean => "bool",
            SettingKind::Character => "char",
            SettingKind::String => "string",
            SettingKind::Enumerated => "enum",
        };
        f.write_str(name)
    }
}

/// Single-byte setting such as a TOS value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteChar(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum DiskCacheAlgorithm {
    Lru = 0,
    LargestContiguous = 1,
    #[default]
    AvoidReadback = 2,
}

impl TryFrom<i32> for DiskCacheAlgorithm {
    type Error = &'static str;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DiskCacheAlgorithm::Lru),
            1 => Ok(DiskCacheAlgorithm::LargestContiguous),
            2 => Ok(DiskCacheAlgorithm::AvoidReadback),
            _ => Err("Not a known disk cache algorithm"),
        }
    }
}

/// Parsing and rendering of a setting's override text.
pub trait SettingValue: Sized {
    const KIND: SettingKind;

    fn parse_override(raw: &str) -> Result<Self, &'static str>;

    fn render(&self) -> String;
}

const NOT_NUMERIC: &str = "Not a valid numeric value";

impl SettingValue for i32 {
    const KIND: SettingKind = SettingKind::Integer;

    fn parse_override(raw: &str) -> Result<Self, &'static str> {
        raw.parse().map_err(|_| NOT_NUMERIC)
    }

    fn render(&self) -> String {
        self.to_string()
    }
}

impl SettingValue for f32 {
    const KIND: SettingKind = SettingKind::Float;

    fn parse_override(raw: &str) -> Result<Self, &'static str> {
        raw.parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or(NOT_NUMERIC)
    }

    fn render(&self) -> String {
        self.to_string()
    }
}

impl SettingValue for bool {
    const KIND: SettingKind = SettingKind::Boolean;

    fn parse_override(raw: &str) -> Result<Self, &'static str> {
        match raw {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err("Overrides of type 'bool' must be either '0' or '1'"),
        }
    }

    fn render(&self) -> String {
        u8::from(*self).to_string()
    }
}

impl SettingValue for ByteChar {
    const KIND: SettingKind = SettingKind::Character;

    fn parse_override(raw: &str) -> Result<Self, &'static str> {
        match raw.as_bytes() {
            [byte] => Ok(ByteChar(*byte)),
            _ => Err("Overrides of type 'char' must be exactly one byte long"),
        }
    }

    fn render(&self) -> String {
        char::from(self.0).to_string()
    }
}

impl SettingValue for String {
    const KIND: SettingKind = SettingKind::String;

    fn parse_override(raw: &str) -> Result<Self, &'static str> {
        Ok(raw.to_string())
    }

    fn render(&self) -> String {
        self.clone()
    }
}

impl SettingValue for DiskCacheAlgorithm {
    const KIND: SettingKind = SettingKind::Enumerated;

    fn parse_override(raw: &str) -> Result<Self, &'static str> {
        DiskCacheAlgorithm::try_from(i32::parse_override(raw)?)
    }

    fn render(&self) -> String {
        (*self as i32).to_string()
    }
}

/// One overridable setting.
#[derive(Clone, Copy)]
pub struct OverrideEntry {
    /// Environment variable name.
    pub name: &'static str,
    pub kind: SettingKind,
    /// Parse `raw` and store it in the field.
    pub apply: fn(&mut SessionSettings, &str) -> Result<(), &'static str>,
    /// Current value of the field in override syntax.
    pub render: fn(&SessionSettings) -> String,
}

impl fmt::Debug for OverrideEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Look up a catalog entry by variable name.
pub fn catalog_entry(name: &str) -> Option<&'static OverrideEntry> {
    CATALOG.iter().find(|entry| entry.name == name)
}

macro_rules! session_settings {
    ($( $field:ident : $ty:ty = $default:expr => $env:literal, )*) => {
        /// Session configuration handed to the swarm engine.
        #[derive(Debug, Clone, PartialEq)]
        pub struct SessionSettings {
            $( pub $field: $ty, )*
        }

        impl Default for SessionSettings {
            fn default() -> Self {
                Self {
                    $( $field: $default, )*
                }
            }
        }

        /// Every overridable setting, in application order.
        pub static CATALOG: &[OverrideEntry] = &[
            $(
                OverrideEntry {
                    name: $env,
                    kind: <$ty as SettingValue>::KIND,
                    apply: |settings, raw| {
                        settings.$field = <$ty as SettingValue>::parse_override(raw)?;
                        Ok(())
                    },
                    render: |settings| SettingValue::render(&settings.$field),
                },
            )*
        ];
    };
}

session_settings! {
    version: i32 = 1600 => "GT_SESSION_VERSION",
    user_agent: String = "libtorrent/0.16.0".to_string() => "GT_SESSION_USER_AGENT",
    tracker_completion_timeout: i32 = 60 => "GT_SESSION_TRACKER_COMPLETION_TIMEOUT",
    tracker_receive_timeout: i32 = 40 => "GT_SESSION_TRACKER_RECEIVE_TIMEOUT",
    stop_tracker_timeout: i32 = 5 => "GT_SESSION_STOP_TRACKER_TIMEOUT",
    tracker_maximum_response_length: i32 = 1024 * 1024 => "GT_SESSION_TRACKER_MAXIMUM_RESPONSE_LENGTH",
    piece_timeout: i32 = 20 => "GT_SESSION_PIECE_TIMEOUT",
    request_timeout: i32 = 50 => "GT_SESSION_REQUEST_TIMEOUT",
    request_queue_time: i32 = 3 => "GT_SESSION_REQUEST_QUEUE_TIME",
    max_allowed_in_request_queue: i32 = 250 => "GT_SESSION_MAX_ALLOWED_IN_REQUEST_QUEUE",
    max_out_request_queue: i32 = 200 => "GT_SESSION_MAX_OUT_REQUEST_QUEUE",
    whole_pieces_threshold: i32 = 20 => "GT_SESSION_WHOLE_PIECES_THRESHOLD",
    peer_timeout: i32 = 120 => "GT_SESSION_PEER_TIMEOUT",
    urlseed_timeout: i32 = 20 => "GT_SESSION_URLSEED_TIMEOUT",
    urlseed_pipeline_size: i32 = 5 => "GT_SESSION_URLSEED_PIPELINE_SIZE",
    urlseed_wait_retry: i32 = 30 => "GT_SESSION_URLSEED_WAIT_RETRY",
    file_pool_size: i32 = 40 => "GT_SESSION_FILE_POOL_SIZE",
    allow_multiple_connections_per_ip: bool = false => "GT_SESSION_ALLOW_MULTIPLE_CONNECTIONS_PER_IP",
    max_failcount: i32 = 3 => "GT_SESSION_MAX_FAILCOUNT",
    min_reconnect_time: i32 = 60 => "GT_SESSION_MIN_RECONNECT_TIME",
    peer_connect_timeout: i32 = 15 => "GT_SESSION_PEER_CONNECT_TIMEOUT",
    ignore_limits_on_local_network: bool = true => "GT_SESSION_IGNORE_LIMITS_ON_LOCAL_NETWORK",
    connection_speed: i32 = 6 => "GT_SESSION_CONNECTION_SPEED",
    send_redundant_have: bool = true => "GT_SESSION_SEND_REDUNDANT_HAVE",
    lazy_bitfields: bool = true => "GT_SESSION_LAZY_BITFIELDS",
    inactivity_timeout: i32 = 600 => "GT_SESSION_INACTIVITY_TIMEOUT",
    unchoke_interval: i32 = 15 => "GT_SESSION_UNCHOKE_INTERVAL",
    optimistic_unchoke_interval: i32 = 30 => "GT_SESSION_OPTIMISTIC_UNCHOKE_INTERVAL",
    announce_ip: String = String::new() => "GT_SESSION_ANNOUNCE_IP",
    num_want: i32 = 200 => "GT_SESSION_NUM_WANT",
    initial_picker_threshold: i32 = 4 => "GT_SESSION_INITIAL_PICKER_THRESHOLD",
    allowed_fast_set_size: i32 = 10 => "GT_SESSION_ALLOWED_FAST_SET_SIZE",
    suggest_mode: i32 = 0 => "GT_SESSION_SUGGEST_MODE",
    max_queued_disk_bytes: i32 = 1024 * 1024 => "GT_SESSION_MAX_QUEUED_DISK_BYTES",
    max_queued_disk_bytes_low_watermark: i32 = 0 => "GT_SESSION_MAX_QUEUED_DISK_BYTES_LOW_WATERMARK",
    handshake_timeout: i32 = 10 => "GT_SESSION_HANDSHAKE_TIMEOUT",
    use_dht_as_fallback: bool = false => "GT_SESSION_USE_DHT_AS_FALLBACK",
    free_torrent_hashes: bool = true => "GT_SESSION_FREE_TORRENT_HASHES",
    upnp_ignore_nonrouters: bool = false => "GT_SESSION_UPNP_IGNORE_NONROUTERS",
    send_buffer_watermark: i32 = 500 * 1024 => "GT_SESSION_SEND_BUFFER_WATERMARK",
    send_buffer_watermark_factor: i32 = 50 => "GT_SESSION_SEND_BUFFER_WATERMARK_FACTOR",
    auto_upload_slots: bool = true => "GT_SESSION_AUTO_UPLOAD_SLOTS",
    auto_upload_slots_rate_based: bool = true => "GT_SESSION_AUTO_UPLOAD_SLOTS_RATE_BASED",
    choking_algorithm: i32 = 0 => "GT_SESSION_CHOKING_ALGORITHM",
    seed_choking_algorithm: i32 = 0 => "GT_SESSION_SEED_CHOKING_ALGORITHM",
    use_parole_mode: bool = true => "GT_SESSION_USE_PAROLE_MODE",
    cache_size: i32 = 1024 => "GT_SESSION_CACHE_SIZE",
    cache_buffer_chunk_size: i32 = 16 => "GT_SESSION_CACHE_BUFFER_CHUNK_SIZE",
    cache_expiry: i32 = 300 => "GT_SESSION_CACHE_EXPIRY",
    use_read_cache: bool = true => "GT_SESSION_USE_READ_CACHE",
    explicit_read_cache: bool = false => "GT_SESSION_EXPLICIT_READ_CACHE",
    explicit_cache_interval: i32 = 30 => "GT_SESSION_EXPLICIT_CACHE_INTERVAL",
    disk_io_write_mode: i32 = 0 => "GT_SESSION_DISK_IO_WRITE_MODE",
    disk_io_read_mode: i32 = 0 => "GT_SESSION_DISK_IO_READ_MODE",
    coalesce_reads: bool = false => "GT_SESSION_COALESCE_READS",
    coalesce_writes: bool = false => "GT_SESSION_COALESCE_WRITES",
    peer_tos: ByteChar = ByteChar(0) => "GT_SESSION_PEER_TOS",
    active_downloads: i32 = 3 => "GT_SESSION_ACTIVE_DOWNLOADS",
    active_seeds: i32 = 5 => "GT_SESSION_ACTIVE_SEEDS",
    active_dht_limit: i32 = 88 => "GT_SESSION_ACTIVE_DHT_LIMIT",
    active_tracker_limit: i32 = 360 => "GT_SESSION_ACTIVE_TRACKER_LIMIT",
    active_lsd_limit: i32 = 60 => "GT_SESSION_ACTIVE_LSD_LIMIT",
    active_limit: i32 = 15 => "GT_SESSION_ACTIVE_LIMIT",
    auto_manage_prefer_seeds: bool = false => "GT_SESSION_AUTO_MANAGE_PREFER_SEEDS",
    dont_count_slow_torrents: bool = true => "GT_SESSION_DONT_COUNT_SLOW_TORRENTS",
    auto_manage_interval: i32 = 30 => "GT_SESSION_AUTO_MANAGE_INTERVAL",
    share_ratio_limit: f32 = 2.0 => "GT_SESSION_SHARE_RATIO_LIMIT",
    seed_time_ratio_limit: f32 = 7.0 => "GT_SESSION_SEED_TIME_RATIO_LIMIT",
    seed_time_limit: i32 = 24 * 60 * 60 => "GT_SESSION_SEED_TIME_LIMIT",
    peer_turnover_interval: i32 = 300 => "GT_SESSION_PEER_TURNOVER_INTERVAL",
    peer_turnover: f32 = 0.04 => "GT_SESSION_PEER_TURNOVER",
    peer_turnover_cutoff: f32 = 0.9 => "GT_SESSION_PEER_TURNOVER_CUTOFF",
    close_redundant_connections: bool = true => "GT_SESSION_CLOSE_REDUNDANT_CONNECTIONS",
    inhibit_keepalives: bool = false => "GT_SESSION_INHIBIT_KEEPALIVES",
    auto_scrape_interval: i32 = 1800 => "GT_SESSION_AUTO_SCRAPE_INTERVAL",
    auto_scrape_min_interval: i32 = 300 => "GT_SESSION_AUTO_SCRAPE_MIN_INTERVAL",
    max_peerlist_size: i32 = 4000 => "GT_SESSION_MAX_PEERLIST_SIZE",
    max_paused_peerlist_size: i32 = 4000 => "GT_SESSION_MAX_PAUSED_PEERLIST_SIZE",
    min_announce_interval: i32 = 5 * 60 => "GT_SESSION_MIN_ANNOUNCE_INTERVAL",
    prioritize_partial_pieces: bool = false => "GT_SESSION_PRIORITIZE_PARTIAL_PIECES",
    auto_manage_startup: i32 = 120 => "GT_SESSION_AUTO_MANAGE_STARTUP",
    rate_limit_ip_overhead: bool = true => "GT_SESSION_RATE_LIMIT_IP_OVERHEAD",
    announce_to_all_trackers: bool = false => "GT_SESSION_ANNOUNCE_TO_ALL_TRACKERS",
    announce_to_all_tiers: bool = false => "GT_SESSION_ANNOUNCE_TO_ALL_TIERS",
    prefer_udp_trackers: bool = true => "GT_SESSION_PREFER_UDP_TRACKERS",
    strict_super_seeding: bool = false => "GT_SESSION_STRICT_SUPER_SEEDING",
    seeding_piece_quota: i32 = 20 => "GT_SESSION_SEEDING_PIECE_QUOTA",
    max_sparse_regions: i32 = 0 => "GT_SESSION_MAX_SPARSE_REGIONS",
    lock_disk_cache: bool = false => "GT_SESSION_LOCK_DISK_CACHE",
    max_rejects: i32 = 50 => "GT_SESSION_MAX_REJECTS",
    recv_socket_buffer_size: i32 = 0 => "GT_SESSION_RECV_SOCKET_BUFFER_SIZE",
    send_socket_buffer_size: i32 = 0 => "GT_SESSION_SEND_SOCKET_BUFFER_SIZE",
    optimize_hashing_for_speed: bool = true => "GT_SESSION_OPTIMIZE_HASHING_FOR_SPEED",
    file_checks_delay_per_block: i32 = 0 => "GT_SESSION_FILE_CHECKS_DELAY_PER_BLOCK",
    disk_cache_algorithm: DiskCacheAlgorithm = DiskCacheAlgorithm::AvoidReadback => "GT_SESSION_DISK_CACHE_ALGORITHM",
    read_cache_line_size: i32 = 32 => "GT_SESSION_READ_CACHE_LINE_SIZE",
    write_cache_line_size: i32 = 32 => "GT_SESSION_WRITE_CACHE_LINE_SIZE",
    optimistic_disk_retry: i32 = 10 * 60 => "GT_SESSION_OPTIMISTIC_DISK_RETRY",
    disable_hash_checks: bool = false => "GT_SESSION_DISABLE_HASH_CHECKS",
    allow_reordered_disk_operations: bool = true => "GT_SESSION_ALLOW_REORDERED_DISK_OPERATIONS",
    allow_i2p_mixed: bool = false => "GT_SESSION_ALLOW_I2P_MIXED",
    max_suggest_pieces: i32 = 10 => "GT_SESSION_MAX_SUGGEST_PIECES",
    drop_skipped_requests: bool = false => "GT_SESSION_DROP_SKIPPED_REQUESTS",
    low_prio_disk: bool = true => "GT_SESSION_LOW_PRIO_DISK",
    local_service_announce_interval: i32 = 5 * 60 => "GT_SESSION_LOCAL_SERVICE_ANNOUNCE_INTERVAL",
    dht_announce_interval: i32 = 15 * 60 => "GT_SESSION_DHT_ANNOUNCE_INTERVAL",
    udp_tracker_token_expiry: i32 = 60 => "GT_SESSION_UDP_TRACKER_TOKEN_EXPIRY",
    volatile_read_cache: bool = false => "GT_SESSION_VOLATILE_READ_CACHE",
    guided_read_cache: bool = false => "GT_SESSION_GUIDED_READ_CACHE",
    default_cache_min_age: i32 = 1 => "GT_SESSION_DEFAULT_CACHE_MIN_AGE",
    num_optimistic_unchoke_slots: i32 = 0 => "GT_SESSION_NUM_OPTIMISTIC_UNCHOKE_SLOTS",
    no_atime_storage: bool = true => "GT_SESSION_NO_ATIME_STORAGE",
    default_est_reciprocation_rate: i32 = 16000 => "GT_SESSION_DEFAULT_EST_RECIPROCATION_RATE",
    increase_est_reciprocation_rate: i32 = 20 => "GT_SESSION_INCREASE_EST_RECIPROCATION_RATE",
    decrease_est_reciprocation_rate: i32 = 3 => "GT_SESSION_DECREASE_EST_RECIPROCATION_RATE",
    incoming_starts_queued_torrents: bool = false => "GT_SESSION_INCOMING_STARTS_QUEUED_TORRENTS",
    report_true_downloaded: bool = false => "GT_SESSION_REPORT_TRUE_DOWNLOADED",
    strict_end_game_mode: bool = true => "GT_SESSION_STRICT_END_GAME_MODE",
    default_peer_upload_rate: i32 = 0 => "GT_SESSION_DEFAULT_PEER_UPLOAD_RATE",
    default_peer_download_rate: i32 = 0 => "GT_SESSION_DEFAULT_PEER_DOWNLOAD_RATE",
    broadcast_lsd: bool = true => "GT_SESSION_BROADCAST_LSD",
    enable_outgoing_utp: bool = true => "GT_SESSION_ENABLE_OUTGOING_UTP",
    enable_incoming_utp: bool = true => "GT_SESSION_ENABLE_INCOMING_UTP",
    enable_outgoing_tcp: bool = true => "GT_SESSION_ENABLE_OUTGOING_TCP",
    enable_incoming_tcp: bool = true => "GT_SESSION_ENABLE_INCOMING_TCP",
    max_pex_peers: i32 = 50 => "GT_SESSION_MAX_PEX_PEERS",
    ignore_resume_timestamps: bool = false => "GT_SESSION_IGNORE_RESUME_TIMESTAMPS",
    no_recheck_incomplete_resume: bool = false => "GT_SESSION_NO_RECHECK_INCOMPLETE_RESUME",
    anonymous_mode: bool = false => "GT_SESSION_ANONYMOUS_MODE",
    tick_interval: i32 = 100 => "GT_SESSION_TICK_INTERVAL",
    report_web_seed_downloads: bool = true => "GT_SESSION_REPORT_WEB_SEED_DOWNLOADS",
    share_mode_target: i32 = 3 => "GT_SESSION_SHARE_MODE_TARGET",
    upload_rate_limit: i32 = 0 => "GT_SESSION_UPLOAD_RATE_LIMIT",
    download_rate_limit: i32 = 0 => "GT_SESSION_DOWNLOAD_RATE_LIMIT",
    local_upload_rate_limit: i32 = 0 => "GT_SESSION_LOCAL_UPLOAD_RATE_LIMIT",
    local_download_rate_limit: i32 = 0 => "GT_SESSION_LOCAL_DOWNLOAD_RATE_LIMIT",
    dht_upload_rate_limit: i32 = 4000 => "GT_SESSION_DHT_UPLOAD_RATE_LIMIT",
    unchoke_slots_limit: i32 = 8 => "GT_SESSION_UNCHOKE_SLOTS_LIMIT",
    half_open_limit: i32 = 0 => "GT_SESSION_HALF_OPEN_LIMIT",
    connections_limit: i32 = 200 => "GT_SESSION_CONNECTIONS_LIMIT",
    utp_target_delay: i32 = 100 => "GT_SESSION_UTP_TARGET_DELAY",
    utp_gain_factor: i32 = 1500 => "GT_SESSION_UTP_GAIN_FACTOR",
    utp_min_timeout: i32 = 500 => "GT_SESSION_UTP_MIN_TIMEOUT",
    utp_syn_resends: i32 = 2 => "GT_SESSION_UTP_SYN_RESENDS",
    utp_fin_resends: i32 = 2 => "GT_SESSION_UTP_FIN_RESENDS",
    utp_num_resends: i32 = 6 => "GT_SESSION_UTP_NUM_RESENDS",
    utp_connect_timeout: i32 = 3000 => "GT_SESSION_UTP_CONNECT_TIMEOUT",
    utp_delayed_ack: i32 = 0 => "GT_SESSION_UTP_DELAYED_ACK",
    utp_dynamic_sock_buf: bool = true => "GT_SESSION_UTP_DYNAMIC_SOCK_BUF",
    mixed_mode_algorithm: i32 = MIXED_MODE_PEER_PROPORTIONAL => "GT_SESSION_MIXED_MODE_ALGORITHM",
    rate_limit_utp: bool = false => "GT_SESSION_RATE_LIMIT_UTP",
    listen_queue_size: i32 = 5 => "GT_SESSION_LISTEN_QUEUE_SIZE",
    announce_double_nat: bool = false => "GT_SESSION_ANNOUNCE_DOUBLE_NAT",
    torrent_connect_boost: i32 = 10 => "GT_SESSION_TORRENT_CONNECT_BOOST",
    seeding_outgoing_connections: bool = true => "GT_SESSION_SEEDING_OUTGOING_CONNECTIONS",
    no_connect_privileged_ports: bool = true => "GT_SESSION_NO_CONNECT_PRIVILEGED_PORTS",
    alert_queue_size: i32 = 1000 => "GT_SESSION_ALERT_QUEUE_SIZE",
    max_metadata_size: i32 = 3 * 1024 * 1024 => "GT_SESSION_MAX_METADATA_SIZE",
    smooth_connects: bool = true => "GT_SESSION_SMOOTH_CONNECTS",
    always_send_user_agent: bool = false => "GT_SESSION_ALWAYS_SEND_USER_AGENT",
    apply_ip_filter_to_trackers: bool = true => "GT_SESSION_APPLY_IP_FILTER_TO_TRACKERS",
    read_job_every: i32 = 10 => "GT_SESSION_READ_JOB_EVERY",
    use_disk_read_ahead: bool = true => "GT_SESSION_USE_DISK_READ_AHEAD",
    lock_files: bool = false => "GT_SESSION_LOCK_FILES",
    ssl_listen: i32 = 4433 => "GT_SESSION_SSL_LISTEN",
    external_port_delta: i32 = 0 => "GT_SESSION_EXTERNAL_PORT_DELTA",
}
