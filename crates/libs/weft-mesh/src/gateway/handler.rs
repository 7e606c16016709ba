//! Bridge-side processing of relayed Internet requests: duplicate
//! suppression, HTTP outcome classification and acknowledgment accounting.

use std::collections::{HashMap, VecDeque};

/// Error text for 2xx codes outside the success allowlist. A 203 from a
/// transparent proxy does not prove end-to-end delivery.
pub const ERROR_AMBIGUOUS_RESPONSE: &str =
    "Ambiguous response - may indicate cached response, not actual delivery";

/// Executes the actual HTTP call on behalf of the mesh. Implemented by the
/// link glue; tests substitute a scripted executor.
pub trait HttpExecutor {
    fn execute(&mut self, url: &str, payload: &str, content_type: &str) -> HttpResult;
}

/// Raw outcome of one HTTP attempt. `status <= 0` means the request never
/// produced a response (connect failure, DNS, timeout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResult {
    pub status: i32,
    pub error: Option<String>,
}

/// How the gateway treats a given HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpOutcome {
    /// Proven delivery: 200, 201, 202 or 204.
    Success,
    /// Worth retrying: network errors, 5xx, 429 and ambiguous 2xx.
    RetryableFailure,
    /// Permanent: other 4xx and 3xx.
    PermanentFailure,
}

pub fn classify_http(status: i32) -> HttpOutcome {
    match status {
        200 | 201 | 202 | 204 => HttpOutcome::Success,
        status if status <= 0 => HttpOutcome::RetryableFailure,
        429 => HttpOutcome::RetryableFailure,
        status if (500..600).contains(&status) => HttpOutcome::RetryableFailure,
        status if (200..300).contains(&status) => HttpOutcome::RetryableFailure,
        _ => HttpOutcome::PermanentFailure,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct HandlerMetrics {
    pub messages_processed: u32,
    pub duplicates_detected: u32,
    pub acknowledgments_sent: u32,
    pub duplicate_acks_skipped: u32,
}

struct TrackedMessage {
    first_seen_ms: u64,
    ack_sent: bool,
}

/// Tracks `(messageId, originNode)` pairs inside the dedup window.
///
/// The first arrival wins: its ACK is recorded the moment it is queued, so a
/// duplicate arriving on a lossy link can never trigger a second HTTP call
/// or a second ACK.
pub struct GatewayMessageHandler {
    tracked: HashMap<(u32, u32), TrackedMessage>,
    order: VecDeque<(u32, u32)>,
    window_ms: u64,
    capacity: usize,
    metrics: HandlerMetrics,
}

impl Default for GatewayMessageHandler {
    fn default() -> Self {
        Self::new(60_000, 500)
    }
}

impl GatewayMessageHandler {
    pub fn new(window_ms: u64, capacity: usize) -> Self {
        Self {
            tracked: HashMap::new(),
            order: VecDeque::new(),
            window_ms,
            capacity: capacity.max(1),
            metrics: HandlerMetrics::default(),
        }
    }

    pub fn configure(&mut self, window_ms: u64, capacity: usize) {
        self.window_ms = window_ms;
        self.capacity = capacity.max(1);
    }

    pub fn metrics(&self) -> HandlerMetrics {
        self.metrics
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Admit a request for processing. Returns false for a duplicate inside
    /// the window, which must be dropped without side effects.
    pub fn begin_processing(&mut self, message_id: u32, origin: u32, now_ms: u64) -> bool {
        self.expire(now_ms);

        let key = (message_id, origin);
        if let Some(entry) = self.tracked.get(&key) {
            self.metrics.duplicates_detected += 1;
            if entry.ack_sent {
                self.metrics.duplicate_acks_skipped += 1;
            }
            log::debug!("gateway: duplicate request msgId={message_id} origin={origin}");
            return false;
        }

        if self.tracked.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.tracked.remove(&oldest);
            }
        }
        self.tracked.insert(key, TrackedMessage { first_seen_ms: now_ms, ack_sent: false });
        self.order.push_back(key);
        self.metrics.messages_processed += 1;
        true
    }

    /// Record that the single ACK for this pair has been queued.
    pub fn mark_ack_sent(&mut self, message_id: u32, origin: u32) {
        if let Some(entry) = self.tracked.get_mut(&(message_id, origin)) {
            if !entry.ack_sent {
                entry.ack_sent = true;
                self.metrics.acknowledgments_sent += 1;
            }
        }
    }

    pub fn clear(&mut self) {
        self.tracked.clear();
        self.order.clear();
    }

    fn expire(&mut self, now_ms: u64) {
        while let Some(&key) = self.order.front() {
            let expired = self
                .tracked
                .get(&key)
                .map_or(true, |entry| now_ms.wrapping_sub(entry.first_seen_ms) > self.window_ms);
            if expired {
                self.order.pop_front();
                self.tracked.remove(&key);
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_allowlist_is_exact() {
        for status in [200, 201, 202, 204] {
            assert_eq!(classify_http(status), HttpOutcome::Success, "status {status}");
        }
        // The historical false positive: 203 must not count as delivered.
        assert_eq!(classify_http(203), HttpOutcome::RetryableFailure);
        assert_eq!(classify_http(205), HttpOutcome::RetryableFailure);
        assert_eq!(classify_http(206), HttpOutcome::RetryableFailure);
    }

    #[test]
    fn server_errors_and_rate_limits_are_retryable() {
        assert_eq!(classify_http(500), HttpOutcome::RetryableFailure);
        assert_eq!(classify_http(503), HttpOutcome::RetryableFailure);
        assert_eq!(classify_http(429), HttpOutcome::RetryableFailure);
        assert_eq!(classify_http(0), HttpOutcome::RetryableFailure);
        assert_eq!(classify_http(-7), HttpOutcome::RetryableFailure);
    }

    #[test]
    fn client_errors_and_redirects_are_permanent() {
        assert_eq!(classify_http(400), HttpOutcome::PermanentFailure);
        assert_eq!(classify_http(404), HttpOutcome::PermanentFailure);
        assert_eq!(classify_http(301), HttpOutcome::PermanentFailure);
    }

    #[test]
    fn duplicate_inside_window_is_rejected_once_tracked() {
        let mut handler = GatewayMessageHandler::default();
        assert!(handler.begin_processing(7, 1001, 0));
        assert!(!handler.begin_processing(7, 1001, 1_000));
        let metrics = handler.metrics();
        assert_eq!(metrics.messages_processed, 1);
        assert_eq!(metrics.duplicates_detected, 1);
        assert_eq!(handler.tracked_count(), 1);
    }

    #[test]
    fn same_id_different_origin_is_not_a_duplicate() {
        let mut handler = GatewayMessageHandler::default();
        assert!(handler.begin_processing(7, 1001, 0));
        assert!(handler.begin_processing(7, 2002, 0));
        assert!(handler.begin_processing(8, 1001, 0));
        assert_eq!(handler.tracked_count(), 3);
        assert_eq!(handler.metrics().duplicates_detected, 0);
    }

    #[test]
    fn window_expiry_allows_reprocessing() {
        let mut handler = GatewayMessageHandler::new(60_000, 500);
        assert!(handler.begin_processing(7, 1001, 0));
        assert!(handler.begin_processing(7, 1001, 61_000));
        assert_eq!(handler.metrics().duplicates_detected, 0);
        assert_eq!(handler.tracked_count(), 1);
    }

    #[test]
    fn exactly_one_ack_per_pair() {
        let mut handler = GatewayMessageHandler::default();
        assert!(handler.begin_processing(7, 1001, 0));
        handler.mark_ack_sent(7, 1001);
        handler.mark_ack_sent(7, 1001);
        assert!(!handler.begin_processing(7, 1001, 100));
        let metrics = handler.metrics();
        assert_eq!(metrics.acknowledgments_sent, 1);
        assert_eq!(metrics.duplicate_acks_skipped, 1);
    }

    #[test]
    fn capacity_evicts_oldest_entries() {
        let mut handler = GatewayMessageHandler::new(60_000, 2);
        assert!(handler.begin_processing(1, 1, 0));
        assert!(handler.begin_processing(2, 1, 0));
        assert!(handler.begin_processing(3, 1, 0));
        assert_eq!(handler.tracked_count(), 2);
        // The oldest pair fell out, so it would be processed again.
        assert!(handler.begin_processing(1, 1, 1));
    }
}
