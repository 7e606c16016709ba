//! Shared-gateway subsystem: configuration, Internet health, bridge
//! election, request relaying and acknowledgment tracking.

mod election;
mod handler;
mod health;
mod pending;

pub use election::{ElectionCandidate, ElectionManager, ElectionOutcome, ElectionState};
pub use handler::{
    classify_http, GatewayMessageHandler, HandlerMetrics, HttpExecutor, HttpOutcome, HttpResult,
    ERROR_AMBIGUOUS_RESPONSE,
};
pub use health::{HealthChecker, InternetProbe, InternetStatus};
pub use pending::{InternetCallback, InternetResponse};

pub(crate) use pending::PendingInternetRequest;

/// Everything a node needs to participate as (or elect) an Internet relay.
///
/// Time fields are milliseconds throughout.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Master switch; a disabled config always validates.
    pub enabled: bool,
    pub router_ssid: String,
    pub router_password: String,

    pub internet_check_interval: u32,
    pub internet_check_host: String,
    pub internet_check_port: u16,
    pub internet_check_timeout: u32,

    pub message_retry_count: u8,
    pub retry_interval: u32,
    pub duplicate_tracking_timeout: u32,
    pub max_tracked_messages: u16,

    pub gateway_heartbeat_interval: u32,
    pub gateway_failure_timeout: u32,
    pub participate_in_election: bool,

    /// Priority stamped on messages relayed through the gateway.
    pub relayed_message_priority: u8,
    pub maintain_permanent_connection: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            router_ssid: String::new(),
            router_password: String::new(),
            internet_check_interval: 30_000,
            internet_check_host: "8.8.8.8".to_string(),
            internet_check_port: 53,
            internet_check_timeout: 5_000,
            message_retry_count: 3,
            retry_interval: 1_000,
            duplicate_tracking_timeout: 60_000,
            max_tracked_messages: 500,
            gateway_heartbeat_interval: 15_000,
            gateway_failure_timeout: 45_000,
            participate_in_election: true,
            relayed_message_priority: 0,
            maintain_permanent_connection: true,
        }
    }
}

/// Why a [`GatewayConfig`] was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("routerSSID is required when enabled")]
    MissingSsid,
    #[error("routerSSID exceeds maximum length of 32 characters")]
    SsidTooLong,
    #[error("routerPassword exceeds maximum length of 63 characters")]
    PasswordTooLong,
    #[error("internetCheckHost cannot be empty")]
    MissingCheckHost,
    #[error("internetCheckInterval must be at least 1000ms")]
    CheckIntervalTooShort,
    #[error("internetCheckTimeout must be at least 100ms")]
    CheckTimeoutTooShort,
    #[error("internetCheckTimeout must be less than internetCheckInterval")]
    TimeoutNotBelowInterval,
    #[error("gatewayHeartbeatInterval must be at least 1000ms")]
    HeartbeatIntervalTooShort,
    #[error("gatewayFailureTimeout should be at least 2x gatewayHeartbeatInterval")]
    FailureTimeoutTooShort,
    #[error("duplicateTrackingTimeout must be at least 1000ms")]
    DedupWindowTooShort,
    #[error("maxTrackedMessages must be at least 10")]
    TrackingCapacityTooSmall,
    #[error("retryInterval must be at least 100ms")]
    RetryIntervalTooShort,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.router_ssid.is_empty() {
            return Err(ConfigError::MissingSsid);
        }
        if self.router_ssid.len() > 32 {
            return Err(ConfigError::SsidTooLong);
        }
        if self.router_password.len() > 63 {
            return Err(ConfigError::PasswordTooLong);
        }
        if self.internet_check_host.is_empty() {
            return Err(ConfigError::MissingCheckHost);
        }
        if self.internet_check_interval < 1_000 {
            return Err(ConfigError::CheckIntervalTooShort);
        }
        if self.internet_check_timeout < 100 {
            return Err(ConfigError::CheckTimeoutTooShort);
        }
        if self.internet_check_timeout >= self.internet_check_interval {
            return Err(ConfigError::TimeoutNotBelowInterval);
        }
        if self.gateway_heartbeat_interval < 1_000 {
            return Err(ConfigError::HeartbeatIntervalTooShort);
        }
        if self.gateway_failure_timeout < self.gateway_heartbeat_interval * 2 {
            return Err(ConfigError::FailureTimeoutTooShort);
        }
        if self.duplicate_tracking_timeout < 1_000 {
            return Err(ConfigError::DedupWindowTooShort);
        }
        if self.max_tracked_messages < 10 {
            return Err(ConfigError::TrackingCapacityTooSmall);
        }
        if self.retry_interval < 100 {
            return Err(ConfigError::RetryIntervalTooShort);
        }
        Ok(())
    }

    pub fn has_router_credentials(&self) -> bool {
        !self.router_ssid.is_empty()
    }

    pub fn can_participate_in_election(&self) -> bool {
        self.participate_in_election && self.has_router_credentials()
    }
}

/// What this node knows about one remote gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BridgeInfo {
    pub node_id: u32,
    pub internet_connected: bool,
    pub router_rssi: i8,
    pub router_channel: u8,
    /// Local receive time of the last status/heartbeat, in ms.
    pub last_seen: u64,
    pub uptime: u32,
    pub gateway_ip: String,
    /// Remote timestamp carried in the last status message.
    pub timestamp: u32,
}

pub const BRIDGE_HEALTH_TIMEOUT_MS: u64 = 60_000;

impl BridgeInfo {
    /// Fresh enough to route through.
    pub fn is_healthy(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.wrapping_sub(self.last_seen) < timeout_ms
    }
}
