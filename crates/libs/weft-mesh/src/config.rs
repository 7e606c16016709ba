/// Tunables of the core runtime. Defaults match the protocol's canonical
/// values; the gateway subsystem has its own config.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Idle window without a sync reply before a connection is closed.
    pub node_timeout_ms: u64,
    /// Cadence of the periodic subtree exchange.
    pub node_sync_interval_ms: u64,
    /// AP-side connections delay their first sync this long; stations sync
    /// immediately.
    pub ap_sync_delay_ms: u64,
    pub time_sync_interval_ms: u64,
    /// First time-sync after a connection is promoted.
    pub time_sync_initial_delay_ms: u64,
    /// Offset adjustments above this fire the time-adjusted callback, in µs.
    pub time_adjust_notify_threshold_us: i64,
    /// Largest chunk handed to the transport per write.
    pub chunk_size: usize,

    pub bridge_status_interval_ms: u64,
    /// Staleness window for `BridgeInfo::is_healthy`.
    pub bridge_timeout_ms: u64,
    /// Delay before a bridge unicasts its status to a promoted neighbor.
    pub bridge_greet_delay_ms: u64,
    pub heartbeat_watch_interval_ms: u64,
    /// Client-side deadline for one Internet request.
    pub request_timeout_ms: u32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            node_timeout_ms: 10_000,
            node_sync_interval_ms: 60_000,
            ap_sync_delay_ms: 10_000,
            time_sync_interval_ms: 600_000,
            time_sync_initial_delay_ms: 1_000,
            time_adjust_notify_threshold_us: 1_000,
            chunk_size: 1024,
            bridge_status_interval_ms: 30_000,
            bridge_timeout_ms: 60_000,
            bridge_greet_delay_ms: 500,
            heartbeat_watch_interval_ms: 5_000,
            request_timeout_ms: 30_000,
        }
    }
}
