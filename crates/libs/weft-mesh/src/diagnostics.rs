//! Aggregated health views for operators and tests.

use serde::Serialize;

use crate::gateway::{BridgeInfo, HandlerMetrics, InternetStatus};
use crate::queue::QueueStats;
use crate::session::Mesh;
use crate::transport::Transport;

/// Per-neighbor link summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub node_id: u32,
    /// Local receive time of the last message, ms.
    pub last_seen: u64,
    pub rssi: i8,
    pub avg_latency_ms: Option<u32>,
    pub hop_count: u32,
    /// 0..=100 from latency, loss and signal.
    pub quality: u8,
    pub messages_rx: u32,
    pub messages_tx: u32,
    pub messages_dropped: u32,
    pub bytes_rx: u64,
    pub bytes_tx: u64,
}

/// One-shot snapshot of everything worth graphing.
#[derive(Debug, Clone, Serialize)]
pub struct MeshHealthReport {
    pub node_id: u32,
    pub is_root: bool,
    pub is_bridge: bool,
    pub mesh_size: usize,
    pub connections: Vec<ConnectionInfo>,
    pub bridges: Vec<BridgeInfo>,
    pub primary_bridge: Option<u32>,
    pub internet: InternetStatus,
    pub gateway: HandlerMetrics,
    pub queue: QueueStats,
}

impl<T: Transport> Mesh<T> {
    /// Link details for every promoted direct neighbor.
    pub fn connection_details(&self) -> Vec<ConnectionInfo> {
        self.iter_live()
            .filter(|conn| conn.neighbor_id != 0)
            .map(|conn| ConnectionInfo {
                node_id: conn.neighbor_id,
                last_seen: conn.time_last_received,
                rssi: conn.link_rssi,
                avg_latency_ms: conn.latency_ms(),
                hop_count: 1,
                quality: conn.quality(),
                messages_rx: conn.messages_rx,
                messages_tx: conn.messages_tx,
                messages_dropped: conn.messages_dropped,
                bytes_rx: conn.bytes_rx,
                bytes_tx: conn.bytes_tx,
            })
            .collect()
    }

    pub fn health_report(&self) -> MeshHealthReport {
        MeshHealthReport {
            node_id: self.node_id(),
            is_root: self.is_root(),
            is_bridge: self.is_bridge(),
            mesh_size: self.as_node_tree().size(),
            connections: self.connection_details(),
            bridges: self.bridges(),
            primary_bridge: self.primary_bridge().map(|bridge| bridge.node_id),
            internet: self.internet_status(),
            gateway: self.gateway_metrics(),
            queue: self.queue_stats(),
        }
    }
}
