//! One live link to a directly connected neighbor.

use std::collections::VecDeque;

use weft_proto::NodeTree;

use crate::buffer::{ReceiveBuffer, SendBuffer};
use crate::scheduler::TaskId;
use crate::transport::Transport;

/// Generational handle to a connection slot. Callbacks and tasks hold these
/// instead of references; a stale handle resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

const MAX_LATENCY_SAMPLES: usize = 10;

pub(crate) struct Connection<T> {
    pub id: ConnectionId,
    pub transport: T,
    /// True when this side initiated the link; stations sync immediately.
    pub station: bool,
    /// 0 until the first node-sync names the peer.
    pub neighbor_id: u32,
    pub new_connection: bool,
    pub open: bool,
    /// The neighbor's advertised subtree, as of the last node-sync.
    pub tree: NodeTree,
    pub receive: ReceiveBuffer,
    pub send: SendBuffer,

    pub node_sync_task: Option<TaskId>,
    pub time_sync_task: Option<TaskId>,
    pub timeout_task: Option<TaskId>,

    pub messages_rx: u32,
    pub messages_tx: u32,
    pub messages_dropped: u32,
    pub bytes_rx: u64,
    pub bytes_tx: u64,
    pub time_last_received: u64,
    latency_samples: VecDeque<u32>,
    /// Link signal strength in dBm, 0 when the glue has none to report.
    pub link_rssi: i8,
}

impl<T: Transport> Connection<T> {
    pub fn new(id: ConnectionId, transport: T, station: bool) -> Self {
        Self {
            id,
            transport,
            station,
            neighbor_id: 0,
            new_connection: true,
            open: true,
            tree: NodeTree::default(),
            receive: ReceiveBuffer::new(),
            send: SendBuffer::new(),
            node_sync_task: None,
            time_sync_task: None,
            timeout_task: None,
            messages_rx: 0,
            messages_tx: 0,
            messages_dropped: 0,
            bytes_rx: 0,
            bytes_tx: 0,
            time_last_received: 0,
            latency_samples: VecDeque::with_capacity(MAX_LATENCY_SAMPLES),
            link_rssi: 0,
        }
    }

    pub fn record_received(&mut self, raw_len: usize, now_ms: u64) {
        self.messages_rx += 1;
        self.bytes_rx += raw_len as u64;
        self.time_last_received = now_ms;
    }

    pub fn record_sent(&mut self, success: bool) {
        if success {
            self.messages_tx += 1;
        } else {
            self.messages_dropped += 1;
        }
    }

    /// Rolling round-trip window fed by time-sync measurements.
    pub fn record_latency(&mut self, latency_ms: u32) {
        if self.latency_samples.len() == MAX_LATENCY_SAMPLES {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Average of the recent round-trip samples, if any.
    pub fn latency_ms(&self) -> Option<u32> {
        if self.latency_samples.is_empty() {
            return None;
        }
        let sum: u64 = self.latency_samples.iter().map(|&sample| sample as u64).sum();
        Some((sum / self.latency_samples.len() as u64) as u32)
    }

    /// Link quality 0..=100 derived from latency, loss rate and RSSI.
    pub fn quality(&self) -> u8 {
        let mut quality: i64 = 100;

        if let Some(latency) = self.latency_ms() {
            if latency > 100 {
                quality -= ((latency - 100) / 5) as i64;
            }
        }

        if self.messages_tx > 0 {
            quality -= (self.messages_dropped as i64 * 100) / self.messages_tx as i64;
        }

        if self.link_rssi < -80 {
            quality -= (self.link_rssi.unsigned_abs() as i64) - 80;
        }

        quality.clamp(0, 100) as u8
    }

    /// Queue one framed message; the update loop pumps it to the transport.
    pub fn enqueue(&mut self, message: &str, priority: u8) {
        self.send.push_with_priority(message, priority);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport;

    impl Transport for NullTransport {
        fn space(&self) -> usize {
            0
        }
        fn write(&mut self, _data: &[u8]) -> usize {
            0
        }
        fn close(&mut self) {}
        fn is_open(&self) -> bool {
            true
        }
    }

    fn connection() -> Connection<NullTransport> {
        Connection::new(ConnectionId { slot: 0, generation: 0 }, NullTransport, true)
    }

    #[test]
    fn latency_window_caps_at_ten_samples() {
        let mut conn = connection();
        for sample in 0..15u32 {
            conn.record_latency(sample);
        }
        // Oldest five fell out, average of 5..=14 is 9.
        assert_eq!(conn.latency_ms(), Some(9));
    }

    #[test]
    fn quality_starts_perfect_and_penalizes_latency() {
        let mut conn = connection();
        assert_eq!(conn.quality(), 100);
        conn.record_latency(600);
        assert_eq!(conn.quality(), 0);
    }

    #[test]
    fn quality_penalizes_loss_and_weak_signal() {
        let mut conn = connection();
        conn.messages_tx = 10;
        conn.messages_dropped = 2;
        assert_eq!(conn.quality(), 80);
        conn.link_rssi = -90;
        assert_eq!(conn.quality(), 70);
    }
}
