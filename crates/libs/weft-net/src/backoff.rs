//! Connect-retry policy for station links.
//!
//! Failures back off 1/2/4/8/8 seconds; after five attempts the peer goes on
//! a 60 second blocklist so a dead bridge cannot pin the node in a retry
//! loop while healthier peers exist.

const RETRY_DELAYS_MS: [u64; 5] = [1_000, 2_000, 4_000, 8_000, 8_000];
const BLOCKLIST_MS: u64 = 60_000;

#[derive(Debug, Default)]
pub struct ReconnectPolicy {
    failures: u32,
    blocked_until_ms: Option<u64>,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connect attempt failed; returns the delay before the next attempt,
    /// or `None` when the peer just went on the blocklist.
    pub fn record_failure(&mut self, now_ms: u64) -> Option<u64> {
        if self.failures as usize >= RETRY_DELAYS_MS.len() {
            self.blocked_until_ms = Some(now_ms + BLOCKLIST_MS);
            self.failures = 0;
            log::warn!("reconnect: peer blocklisted for {} s", BLOCKLIST_MS / 1000);
            return None;
        }
        let delay = RETRY_DELAYS_MS[self.failures as usize];
        self.failures += 1;
        Some(delay)
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.blocked_until_ms = None;
    }

    pub fn is_blocked(&self, now_ms: u64) -> bool {
        self.blocked_until_ms.is_some_and(|until| now_ms < until)
    }

    /// Milliseconds until the blocklist lifts, 0 when not blocked.
    pub fn blocked_for_ms(&self, now_ms: u64) -> u64 {
        match self.blocked_until_ms {
            Some(until) if until > now_ms => until - now_ms,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_follow_the_documented_schedule() {
        let mut policy = ReconnectPolicy::new();
        let delays: Vec<Option<u64>> = (0..6).map(|_| policy.record_failure(0)).collect();
        assert_eq!(
            delays,
            vec![Some(1_000), Some(2_000), Some(4_000), Some(8_000), Some(8_000), None]
        );
    }

    #[test]
    fn blocklist_lifts_after_a_minute() {
        let mut policy = ReconnectPolicy::new();
        for _ in 0..5 {
            policy.record_failure(0);
        }
        assert_eq!(policy.record_failure(10_000), None);
        assert!(policy.is_blocked(10_000));
        assert!(policy.is_blocked(69_999));
        assert!(!policy.is_blocked(70_000));
        assert_eq!(policy.blocked_for_ms(30_000), 40_000);
    }

    #[test]
    fn success_resets_the_schedule() {
        let mut policy = ReconnectPolicy::new();
        policy.record_failure(0);
        policy.record_failure(0);
        policy.record_success();
        assert_eq!(policy.record_failure(0), Some(1_000));
        assert!(!policy.is_blocked(0));
    }
}
