//! Periodic Internet reachability checking for gateway nodes.

use super::GatewayConfig;

/// Opens a short-lived TCP connection to prove the uplink works. Implemented
/// by the link glue; tests substitute a scripted probe.
pub trait InternetProbe {
    /// Attempt a connection to `host:port`; `Ok(latency_ms)` on success.
    fn probe(&mut self, host: &str, port: u16, timeout_ms: u32) -> Result<u32, String>;
}

/// Rolling record of connectivity checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct InternetStatus {
    pub available: bool,
    pub last_check_ms: u64,
    pub last_success_ms: u64,
    pub check_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub last_latency_ms: u32,
    pub last_error: String,
    pub check_host: String,
    pub check_port: u16,
}

impl InternetStatus {
    /// Share of checks that succeeded, 0..=100.
    pub fn uptime_percent(&self) -> u8 {
        if self.check_count == 0 {
            return 0;
        }
        ((self.success_count as u64 * 100) / self.check_count as u64) as u8
    }

    pub fn time_since_last_success(&self, now_ms: u64) -> Option<u64> {
        (self.last_success_ms != 0).then(|| now_ms.wrapping_sub(self.last_success_ms))
    }

    pub fn is_stale(&self, now_ms: u64, max_age_ms: u64) -> bool {
        self.last_check_ms == 0 || now_ms.wrapping_sub(self.last_check_ms) > max_age_ms
    }
}

/// Drives the probe on the configured target and keeps [`InternetStatus`].
pub struct HealthChecker {
    host: String,
    port: u16,
    timeout_ms: u32,
    status: InternetStatus,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new("8.8.8.8", 53, 5_000)
    }
}

impl HealthChecker {
    pub fn new(host: &str, port: u16, timeout_ms: u32) -> Self {
        let status = InternetStatus {
            check_host: host.to_string(),
            check_port: port,
            ..InternetStatus::default()
        };
        Self { host: host.to_string(), port, timeout_ms, status }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(&config.internet_check_host, config.internet_check_port, config.internet_check_timeout)
    }

    pub fn set_target(&mut self, host: &str, port: u16) {
        self.host = host.to_string();
        self.port = port;
        self.status.check_host = self.host.clone();
        self.status.check_port = port;
    }

    pub fn status(&self) -> &InternetStatus {
        &self.status
    }

    pub fn available(&self) -> bool {
        self.status.available
    }

    pub fn reset_stats(&mut self) {
        self.status = InternetStatus {
            check_host: self.host.clone(),
            check_port: self.port,
            ..InternetStatus::default()
        };
    }

    /// Run one check; returns `Some(new_state)` on an edge transition so the
    /// caller can fan the change out.
    pub fn check_now(&mut self, probe: &mut dyn InternetProbe, now_ms: u64) -> Option<bool> {
        self.status.check_count += 1;
        self.status.last_check_ms = now_ms;

        let connected = match probe.probe(&self.host, self.port, self.timeout_ms) {
            Ok(latency_ms) => {
                self.status.success_count += 1;
                self.status.last_success_ms = now_ms;
                self.status.last_latency_ms = latency_ms;
                self.status.last_error.clear();
                true
            }
            Err(error) => {
                self.status.failure_count += 1;
                self.status.last_error = error;
                false
            }
        };

        if connected != self.status.available {
            self.status.available = connected;
            log::info!(
                "gateway health: internet {} ({}:{})",
                if connected { "reachable" } else { "unreachable" },
                self.host,
                self.port
            );
            return Some(connected);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedProbe {
        results: Vec<Result<u32, String>>,
    }

    impl InternetProbe for ScriptedProbe {
        fn probe(&mut self, _host: &str, _port: u16, _timeout_ms: u32) -> Result<u32, String> {
            self.results.remove(0)
        }
    }

    #[test]
    fn edges_fire_only_on_transitions() {
        let mut checker = HealthChecker::new("8.8.8.8", 53, 1_000);
        let mut probe = ScriptedProbe {
            results: vec![
                Ok(12),
                Ok(15),
                Err("connect timeout".to_string()),
                Err("connect timeout".to_string()),
                Ok(9),
            ],
        };
        assert_eq!(checker.check_now(&mut probe, 0), Some(true));
        assert_eq!(checker.check_now(&mut probe, 1_000), None);
        assert_eq!(checker.check_now(&mut probe, 2_000), Some(false));
        assert_eq!(checker.check_now(&mut probe, 3_000), None);
        assert_eq!(checker.check_now(&mut probe, 4_000), Some(true));

        let status = checker.status();
        assert_eq!(status.check_count, 5);
        assert_eq!(status.success_count, 3);
        assert_eq!(status.failure_count, 2);
        assert_eq!(status.uptime_percent(), 60);
        assert_eq!(status.last_latency_ms, 9);
        assert!(status.last_error.is_empty());
    }

    #[test]
    fn failure_records_the_error() {
        let mut checker = HealthChecker::default();
        let mut probe = ScriptedProbe { results: vec![Err("no route".to_string())] };
        assert_eq!(checker.check_now(&mut probe, 500), None);
        assert!(!checker.available());
        assert_eq!(checker.status().last_error, "no route");
        assert_eq!(checker.status().time_since_last_success(600), None);
    }

    #[test]
    fn staleness_tracks_the_last_check() {
        let mut checker = HealthChecker::default();
        assert!(checker.status().is_stale(0, 60_000));
        let mut probe = ScriptedProbe { results: vec![Ok(5)] };
        checker.check_now(&mut probe, 1_000);
        assert!(!checker.status().is_stale(30_000, 60_000));
        assert!(checker.status().is_stale(62_000, 60_000));
    }
}
