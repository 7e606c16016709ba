//! The mesh session: owns connections, the task table and all protocol
//! state, and exposes the public node API.
//!
//! Everything runs on one logical agent: the host calls [`Mesh::feed`] with
//! inbound bytes and [`Mesh::update`] from its loop; user callbacks receive
//! `&mut Mesh<T>` so they can call straight back into the session.

mod gateway_api;
mod ntp;
mod router;

use std::collections::HashMap;

use weft_proto::variant::BroadcastPackage;
use weft_proto::{NodeTree, Variant};

use crate::buffer::{PRIORITY_HIGH, PRIORITY_NORMAL};
use crate::clock::Clock;
use crate::config::MeshConfig;
use crate::connection::{Connection, ConnectionId};
use crate::error::MeshError;
use crate::gateway::{BridgeInfo, InternetProbe};
use crate::queue::MessageQueue;
use crate::rtc::{RtcAdapter, RtcKind, RtcManager};
use crate::scheduler::{Scheduler, TaskKind};
use crate::transport::Transport;

pub(crate) use gateway_api::GatewayState;

pub type ReceivedCallback<T> = Box<dyn FnMut(&mut Mesh<T>, u32, &str)>;
pub type ConnectionCallback<T> = Box<dyn FnMut(&mut Mesh<T>, u32)>;
pub type TimeAdjustedCallback<T> = Box<dyn FnMut(&mut Mesh<T>, i32)>;
pub type DelayCallback<T> = Box<dyn FnMut(&mut Mesh<T>, u32, i32)>;
pub type BridgeStatusCallback<T> = Box<dyn FnMut(&mut Mesh<T>, u32, bool)>;
pub type GatewayChangedCallback<T> = Box<dyn FnMut(&mut Mesh<T>, u32, u32, &str)>;
pub type RoleChangedCallback<T> = Box<dyn FnMut(&mut Mesh<T>, bool, &str)>;
pub type ConnectivityCallback<T> = Box<dyn FnMut(&mut Mesh<T>, bool)>;
/// Returns true when the package was consumed, stopping further dispatch.
pub type PackageHandler<T> = Box<dyn FnMut(&mut Mesh<T>, &Variant, ConnectionId) -> bool>;

struct Callbacks<T: Transport> {
    received: Vec<ReceivedCallback<T>>,
    new_connection: Vec<ConnectionCallback<T>>,
    dropped_connection: Vec<ConnectionCallback<T>>,
    changed_connections: Vec<ConnectionCallback<T>>,
    node_time_adjusted: Option<TimeAdjustedCallback<T>>,
    node_delay_received: Option<DelayCallback<T>>,
    bridge_status_changed: Option<BridgeStatusCallback<T>>,
    gateway_changed: Option<GatewayChangedCallback<T>>,
    bridge_role_changed: Option<RoleChangedCallback<T>>,
    connectivity_changed: Option<ConnectivityCallback<T>>,
    packages: HashMap<u16, Vec<PackageHandler<T>>>,
}

impl<T: Transport> Default for Callbacks<T> {
    fn default() -> Self {
        Self {
            received: Vec::new(),
            new_connection: Vec::new(),
            dropped_connection: Vec::new(),
            changed_connections: Vec::new(),
            node_time_adjusted: None,
            node_delay_received: None,
            bridge_status_changed: None,
            gateway_changed: None,
            bridge_role_changed: None,
            connectivity_changed: None,
            packages: HashMap::new(),
        }
    }
}

/// One mesh node.
pub struct Mesh<T: Transport> {
    node_id: u32,
    root: bool,
    contains_root: bool,
    config: MeshConfig,
    clock: Box<dyn Clock>,
    time_offset_us: i64,

    connections: Vec<Option<Connection<T>>>,
    generations: Vec<u32>,
    free_slots: Vec<u32>,

    pub(crate) scheduler: Scheduler,
    callbacks: Callbacks<T>,

    pub(crate) known_bridges: Vec<BridgeInfo>,
    pub(crate) last_known_bridge: Option<BridgeInfo>,
    pub(crate) gateway: GatewayState,
    pub(crate) queue: MessageQueue,
    rtc: RtcManager,
}

impl<T: Transport> Mesh<T> {
    /// Create a node with the given stable id (0 is reserved and logged as
    /// a configuration error, matching the unassigned sentinel).
    pub fn new(node_id: u32, config: MeshConfig, clock: Box<dyn Clock>) -> Self {
        if node_id == 0 {
            log::error!("mesh: node id 0 is reserved for unassigned");
        }
        Self {
            node_id,
            root: false,
            contains_root: false,
            config,
            clock,
            time_offset_us: 0,
            connections: Vec::new(),
            generations: Vec::new(),
            free_slots: Vec::new(),
            scheduler: Scheduler::new(),
            callbacks: Callbacks::default(),
            known_bridges: Vec::new(),
            last_known_bridge: None,
            gateway: GatewayState::default(),
            queue: MessageQueue::default(),
            rtc: RtcManager::default(),
        }
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn set_root(&mut self, on: bool) {
        self.root = on;
    }

    pub fn set_contains_root(&mut self, on: bool) {
        self.contains_root = on;
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn contains_root(&self) -> bool {
        self.contains_root || self.root
    }

    /// Disconnect everything and drop all registered callbacks and tasks.
    pub fn stop(&mut self) {
        let now = self.now_ms();
        for id in self.live_connection_ids() {
            self.close_connection(id, now);
        }
        self.sweep_closed();
        self.scheduler = Scheduler::new();
        self.callbacks = Callbacks::default();
        self.gateway.stop();
        log::info!("mesh({}): stopped", self.node_id);
    }

    /// Drive the runtime: dispatch buffered messages, run due tasks, pump
    /// send buffers, sweep closed connections. Call from the host loop.
    pub fn update(&mut self) {
        let now = self.now_ms();
        self.process_incoming(now);
        for (_, kind) in self.scheduler.take_due(now) {
            self.run_task(kind, now);
        }
        self.pump_send_buffers();
        self.sweep_closed();
    }

    // ---- transport attachment ------------------------------------------

    /// Attach a transport channel to a new neighbor. `station` is true when
    /// this side initiated the link; stations start node-sync immediately,
    /// the AP side waits out the configured delay.
    pub fn add_connection(&mut self, transport: T, station: bool) -> ConnectionId {
        let now = self.now_ms();
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                self.connections.push(None);
                self.generations.push(0);
                self.connections.len() as u32 - 1
            }
        };
        let id = ConnectionId { slot, generation: self.generations[slot as usize] };
        let mut conn = Connection::new(id, transport, station);

        let first_sync = if station { now } else { now + self.config.ap_sync_delay_ms };
        conn.node_sync_task = Some(self.scheduler.every(
            TaskKind::NodeSync(id),
            first_sync,
            self.config.node_sync_interval_ms,
        ));

        self.connections[slot as usize] = Some(conn);
        log::debug!("mesh({}): new {} connection", self.node_id, if station { "station" } else { "ap" });
        id
    }

    /// Hand inbound bytes from the transport to the connection's receive
    /// buffer; messages are dispatched on the next `update`.
    pub fn feed(&mut self, id: ConnectionId, bytes: &[u8]) -> Result<(), MeshError> {
        let conn = self.connection_mut(id).ok_or(MeshError::StaleConnection)?;
        conn.bytes_rx += bytes.len() as u64;
        conn.receive.push(bytes);
        Ok(())
    }

    /// The transport observed a disconnect; tear the connection down.
    pub fn drop_connection(&mut self, id: ConnectionId) {
        let now = self.now_ms();
        self.close_connection(id, now);
    }

    /// Link glue reports signal strength for a connection.
    pub fn set_link_rssi(&mut self, id: ConnectionId, rssi: i8) {
        if let Some(conn) = self.connection_mut(id) {
            conn.link_rssi = rssi;
        }
    }

    // ---- messaging ------------------------------------------------------

    /// Send a text message to one node. Quietly returns false when no route
    /// is known.
    pub fn send_single(&mut self, dest: u32, msg: &str) -> bool {
        if dest == 0 || dest == self.node_id {
            return false;
        }
        log::debug!("mesh({}): sendSingle dest={dest}", self.node_id);
        let pkg = weft_proto::variant::SinglePackage::new(self.node_id, dest, msg.to_string());
        self.send_variant(&Variant::Single(pkg), PRIORITY_NORMAL)
    }

    /// Flood a text message to every node. With `include_self` the local
    /// receive callback fires as well.
    pub fn send_broadcast(&mut self, msg: &str, include_self: bool) -> bool {
        log::debug!("mesh({}): sendBroadcast", self.node_id);
        let pkg = BroadcastPackage::new(self.node_id, msg.to_string());
        let Ok(text) = Variant::Broadcast(pkg).encode() else { return false };
        let copies = self.forward_broadcast(&text, None);
        if include_self {
            let own = msg.to_string();
            self.fire_received(self.node_id, &own);
        }
        copies > 0 || include_self
    }

    /// Send any package by its envelope routing (plugin packages included).
    pub fn send_package(&mut self, variant: &Variant, priority: u8) -> bool {
        match variant.routing() {
            weft_proto::Routing::Broadcast => {
                let Ok(text) = variant.encode() else { return false };
                self.forward_broadcast(&text, None) > 0
            }
            _ => self.send_variant(variant, priority),
        }
    }

    /// Measure the round trip to a node; the result arrives through
    /// `on_node_delay_received`. False when the node is unreachable.
    pub fn start_delay_measurement(&mut self, dest: u32) -> bool {
        if self.find_route(dest).is_none() {
            return false;
        }
        let pkg = weft_proto::variant::TimeDelayPackage::request(self.node_id, dest, self.node_time());
        self.send_variant(&Variant::TimeDelay(pkg), PRIORITY_HIGH)
    }

    // ---- layout queries -------------------------------------------------

    /// This node's view of the whole mesh as a tree.
    pub fn as_node_tree(&self) -> NodeTree {
        NodeTree {
            node_id: self.node_id,
            root: self.root,
            has_time_authority: self.has_time_authority(),
            subs: self
                .iter_live()
                .filter(|conn| conn.neighbor_id != 0)
                .map(|conn| conn.tree.clone())
                .collect(),
        }
    }

    /// All known node ids, directly and indirectly connected.
    pub fn node_list(&self, include_self: bool) -> Vec<u32> {
        self.as_node_tree().flatten(include_self)
    }

    /// JSON rendering of the direct-subtree view, for diagnostics.
    pub fn sub_connection_json(&self) -> String {
        serde_json::to_string(&self.as_node_tree()).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn is_connected(&self, node_id: u32) -> bool {
        self.find_route(node_id).is_some()
    }

    /// Hop count to a node, -1 when unreachable.
    pub fn hop_count(&self, node_id: u32) -> i32 {
        match self.as_node_tree().depth_of(node_id) {
            Some(depth) => depth as i32,
            None => -1,
        }
    }

    /// Destination to next-hop-neighbor map over the current layout.
    pub fn routing_table(&self) -> HashMap<u32, u32> {
        let mut table = HashMap::new();
        for conn in self.iter_live() {
            if conn.neighbor_id == 0 {
                continue;
            }
            for dest in conn.tree.flatten(true) {
                table.entry(dest).or_insert(conn.neighbor_id);
            }
        }
        table
    }

    /// Whether at least one promoted neighbor link is up.
    pub fn has_active_mesh_connections(&self) -> bool {
        self.iter_live().any(|conn| conn.neighbor_id != 0)
    }

    // ---- node time ------------------------------------------------------

    /// Mesh-adjusted node time in wrapping microseconds.
    pub fn node_time(&self) -> u32 {
        (self.clock.now_us() as i64).wrapping_add(self.time_offset_us) as u32
    }

    /// Skew node time directly, e.g. to seed a known offset before the mesh
    /// synchronizes, or after an RTC correction.
    pub fn set_node_time_offset(&mut self, offset_us: i64) {
        self.time_offset_us = offset_us;
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub(crate) fn adjust_time(&mut self, offset_us: i32) {
        self.time_offset_us += offset_us as i64;
        if (offset_us as i64).abs() > self.config.time_adjust_notify_threshold_us {
            self.fire_node_time_adjusted(offset_us);
        }
    }

    /// Whether this node holds an independent time source.
    pub fn has_time_authority(&self) -> bool {
        self.rtc.is_enabled() || (self.gateway.is_bridge && self.gateway.health.available())
    }

    // ---- RTC ------------------------------------------------------------

    pub fn enable_rtc(&mut self, adapter: Box<dyn RtcAdapter>) -> bool {
        self.rtc.enable(adapter)
    }

    pub fn disable_rtc(&mut self) {
        self.rtc.disable();
    }

    pub fn has_rtc(&self) -> bool {
        self.rtc.is_enabled()
    }

    pub fn rtc_kind(&self) -> RtcKind {
        self.rtc.kind()
    }

    pub fn sync_rtc_from_ntp(&mut self, unix_timestamp: u32) -> bool {
        let now = self.now_ms();
        self.rtc.sync_from_ntp(unix_timestamp, now)
    }

    pub fn time_since_rtc_sync(&self) -> u64 {
        self.rtc.time_since_last_sync(self.now_ms())
    }

    /// RTC Unix time when available, otherwise mesh node time.
    pub fn accurate_time(&self) -> u32 {
        let rtc_time = self.rtc.time();
        if rtc_time > 0 {
            rtc_time
        } else {
            self.node_time()
        }
    }

    // ---- callback registration -----------------------------------------

    pub fn on_receive(&mut self, callback: ReceivedCallback<T>) {
        self.callbacks.received.push(callback);
    }

    pub fn on_new_connection(&mut self, callback: ConnectionCallback<T>) {
        self.callbacks.new_connection.push(callback);
    }

    pub fn on_dropped_connection(&mut self, callback: ConnectionCallback<T>) {
        self.callbacks.dropped_connection.push(callback);
    }

    pub fn on_changed_connections(&mut self, callback: ConnectionCallback<T>) {
        self.callbacks.changed_connections.push(callback);
    }

    pub fn on_node_time_adjusted(&mut self, callback: TimeAdjustedCallback<T>) {
        self.callbacks.node_time_adjusted = Some(callback);
    }

    pub fn on_node_delay_received(&mut self, callback: DelayCallback<T>) {
        self.callbacks.node_delay_received = Some(callback);
    }

    pub fn on_bridge_status_changed(&mut self, callback: BridgeStatusCallback<T>) {
        self.callbacks.bridge_status_changed = Some(callback);
    }

    pub fn on_gateway_changed(&mut self, callback: GatewayChangedCallback<T>) {
        self.callbacks.gateway_changed = Some(callback);
    }

    pub fn on_bridge_role_changed(&mut self, callback: RoleChangedCallback<T>) {
        self.callbacks.bridge_role_changed = Some(callback);
    }

    pub fn on_connectivity_changed(&mut self, callback: ConnectivityCallback<T>) {
        self.callbacks.connectivity_changed = Some(callback);
    }

    /// Register a handler for a plugin package type. Handlers run in
    /// registration order until one consumes the package.
    pub fn on_package(&mut self, type_id: u16, handler: PackageHandler<T>) {
        self.callbacks.packages.entry(type_id).or_default().push(handler);
    }

    // ---- internals: connection slab ------------------------------------

    pub(crate) fn connection(&self, id: ConnectionId) -> Option<&Connection<T>> {
        let slot = self.connections.get(id.slot as usize)?.as_ref()?;
        (slot.id == id && slot.open).then_some(slot)
    }

    pub(crate) fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<T>> {
        let slot = self.connections.get_mut(id.slot as usize)?.as_mut()?;
        (slot.id == id && slot.open).then_some(slot)
    }

    pub(crate) fn iter_live(&self) -> impl Iterator<Item = &Connection<T>> {
        self.connections.iter().flatten().filter(|conn| conn.open)
    }

    pub(crate) fn live_connection_ids(&self) -> Vec<ConnectionId> {
        self.iter_live().map(|conn| conn.id).collect()
    }

    /// Connection through which `target` is reachable, first match wins.
    pub(crate) fn find_route(&self, target: u32) -> Option<ConnectionId> {
        self.iter_live()
            .find(|conn| conn.neighbor_id != 0 && conn.tree.contains(target))
            .map(|conn| conn.id)
    }

    pub(crate) fn find_route_excluding(
        &self,
        target: u32,
        exclude: ConnectionId,
    ) -> Option<ConnectionId> {
        self.iter_live()
            .find(|conn| conn.id != exclude && conn.neighbor_id != 0 && conn.tree.contains(target))
            .map(|conn| conn.id)
    }

    pub(crate) fn enqueue_on(&mut self, id: ConnectionId, text: &str, priority: u8) -> bool {
        match self.connection_mut(id) {
            Some(conn) => {
                conn.enqueue(text, priority);
                true
            }
            None => false,
        }
    }

    pub(crate) fn send_variant(&mut self, variant: &Variant, priority: u8) -> bool {
        let dest = variant.dest();
        let Some(route) = self.find_route(dest) else {
            log::debug!("mesh({}): no route to {dest}", self.node_id);
            return false;
        };
        let Ok(text) = variant.encode() else { return false };
        self.enqueue_on(route, &text, priority)
    }

    /// Copy onto every live connection except `exclude`; returns the count.
    pub(crate) fn forward_broadcast(&mut self, text: &str, exclude: Option<ConnectionId>) -> usize {
        let targets: Vec<ConnectionId> = self
            .iter_live()
            .filter(|conn| Some(conn.id) != exclude)
            .map(|conn| conn.id)
            .collect();
        let mut copies = 0;
        for id in targets {
            if self.enqueue_on(id, text, PRIORITY_NORMAL) {
                copies += 1;
            }
        }
        copies
    }

    pub(crate) fn close_connection(&mut self, id: ConnectionId, now: u64) {
        let Some(conn) = self.connection_mut(id) else { return };
        conn.open = false;
        conn.transport.close();
        conn.messages_dropped += conn.send.len() as u32;
        conn.receive.clear();
        conn.send.clear();
        let neighbor = conn.neighbor_id;
        let station = conn.station;
        let tasks = [conn.node_sync_task.take(), conn.time_sync_task.take(), conn.timeout_task.take()];
        for task in tasks.into_iter().flatten() {
            self.scheduler.cancel(task);
        }
        log::info!("mesh({}): connection to {neighbor} closed (station={station})", self.node_id);
        if neighbor != 0 {
            self.fire_changed_connections(neighbor);
            self.fire_dropped_connection(neighbor);
            // The rest of the mesh must learn the shrunken layout now, not
            // at the next periodic sync.
            let others: Vec<ConnectionId> = self
                .iter_live()
                .filter(|conn| conn.neighbor_id != 0)
                .map(|conn| conn.id)
                .collect();
            for other in others {
                self.run_node_sync(other, now);
            }
        }
    }

    fn sweep_closed(&mut self) {
        for slot in 0..self.connections.len() {
            let closed = self.connections[slot].as_ref().is_some_and(|conn| !conn.open);
            if closed {
                self.connections[slot] = None;
                self.generations[slot] += 1;
                self.free_slots.push(slot as u32);
            }
        }
    }

    // ---- internals: update phases --------------------------------------

    fn process_incoming(&mut self, now: u64) {
        for id in self.live_connection_ids() {
            loop {
                let Some(message) = self.connection_mut(id).and_then(|conn| conn.receive.pop_front())
                else {
                    break;
                };
                if let Some(conn) = self.connection_mut(id) {
                    conn.record_received(message.len() + 1, now);
                }
                self.route_message(id, &message, now);
                if self.connection(id).is_none() {
                    break;
                }
            }
        }
    }

    fn pump_send_buffers(&mut self) {
        let chunk_size = self.config.chunk_size;
        for id in self.live_connection_ids() {
            loop {
                let Some(conn) = self.connection_mut(id) else { break };
                if conn.send.is_empty() || !conn.transport.is_open() {
                    break;
                }
                let space = conn.transport.space();
                if space == 0 {
                    break;
                }
                let window = space.min(chunk_size);
                let len = conn.send.request_length(window);
                if len == 0 {
                    break;
                }
                let entries_before = conn.send.len();
                let written = {
                    let Some(chunk) = conn.send.read_chunk(len) else { break };
                    conn.transport.write(chunk)
                };
                let priority = conn.send.last_read_priority();
                conn.send.free_read(written);
                conn.bytes_tx += written as u64;
                if written == 0 {
                    break;
                }
                if conn.send.len() < entries_before {
                    conn.record_sent(true);
                    if priority <= PRIORITY_HIGH {
                        conn.transport.flush();
                    }
                }
            }
        }
    }

    fn run_task(&mut self, kind: TaskKind, now: u64) {
        match kind {
            TaskKind::NodeSync(id) => self.run_node_sync(id, now),
            TaskKind::TimeSync(id) => self.run_time_sync(id, now),
            TaskKind::ConnectionTimeout(id) => {
                let timed_out = self.connection_mut(id).map(|conn| {
                    conn.timeout_task = None;
                    conn.neighbor_id
                });
                if let Some(neighbor) = timed_out {
                    log::warn!("mesh({}): connection to {neighbor} timed out", self.node_id);
                    self.close_connection(id, now);
                }
            }
            TaskKind::BridgeStatusBroadcast => self.run_bridge_status_broadcast(now),
            TaskKind::GatewayHeartbeat => self.run_gateway_heartbeat(now),
            TaskKind::HeartbeatWatch => self.run_heartbeat_watch(now),
            TaskKind::InternetCheck => self.run_internet_check(now),
            TaskKind::ElectionStart => self.start_bridge_election(),
            TaskKind::ElectionEvaluate => self.run_election_evaluate(now),
            TaskKind::RequestTimeout(message_id) => self.run_request_timeout(message_id),
            TaskKind::RequestRetry(message_id) => self.run_request_retry(message_id, now),
            TaskKind::GreetNeighbor(id) => self.run_greet_neighbor(id, now),
        }
    }

    // ---- internals: callback dispatch ----------------------------------

    pub(crate) fn fire_received(&mut self, from: u32, msg: &str) {
        let mut list = std::mem::take(&mut self.callbacks.received);
        for callback in list.iter_mut() {
            callback(self, from, msg);
        }
        let mut registered_during = std::mem::take(&mut self.callbacks.received);
        list.append(&mut registered_during);
        self.callbacks.received = list;
    }

    pub(crate) fn fire_new_connection(&mut self, node_id: u32) {
        if node_id == 0 {
            return;
        }
        let mut list = std::mem::take(&mut self.callbacks.new_connection);
        for callback in list.iter_mut() {
            callback(self, node_id);
        }
        let mut registered_during = std::mem::take(&mut self.callbacks.new_connection);
        list.append(&mut registered_during);
        self.callbacks.new_connection = list;
    }

    pub(crate) fn fire_dropped_connection(&mut self, node_id: u32) {
        if node_id == 0 {
            return;
        }
        let mut list = std::mem::take(&mut self.callbacks.dropped_connection);
        for callback in list.iter_mut() {
            callback(self, node_id);
        }
        let mut registered_during = std::mem::take(&mut self.callbacks.dropped_connection);
        list.append(&mut registered_during);
        self.callbacks.dropped_connection = list;
    }

    pub(crate) fn fire_changed_connections(&mut self, node_id: u32) {
        if node_id == 0 {
            return;
        }
        let mut list = std::mem::take(&mut self.callbacks.changed_connections);
        for callback in list.iter_mut() {
            callback(self, node_id);
        }
        let mut registered_during = std::mem::take(&mut self.callbacks.changed_connections);
        list.append(&mut registered_during);
        self.callbacks.changed_connections = list;
    }

    fn fire_node_time_adjusted(&mut self, offset_us: i32) {
        if let Some(mut callback) = self.callbacks.node_time_adjusted.take() {
            callback(self, offset_us);
            if self.callbacks.node_time_adjusted.is_none() {
                self.callbacks.node_time_adjusted = Some(callback);
            }
        }
    }

    pub(crate) fn fire_node_delay_received(&mut self, node_id: u32, delay_us: i32) {
        if let Some(mut callback) = self.callbacks.node_delay_received.take() {
            callback(self, node_id, delay_us);
            if self.callbacks.node_delay_received.is_none() {
                self.callbacks.node_delay_received = Some(callback);
            }
        }
    }

    pub(crate) fn fire_bridge_status_changed(&mut self, node_id: u32, internet: bool) {
        if let Some(mut callback) = self.callbacks.bridge_status_changed.take() {
            callback(self, node_id, internet);
            if self.callbacks.bridge_status_changed.is_none() {
                self.callbacks.bridge_status_changed = Some(callback);
            }
        }
    }

    pub(crate) fn fire_gateway_changed(&mut self, new_bridge: u32, previous: u32, reason: &str) {
        if let Some(mut callback) = self.callbacks.gateway_changed.take() {
            callback(self, new_bridge, previous, reason);
            if self.callbacks.gateway_changed.is_none() {
                self.callbacks.gateway_changed = Some(callback);
            }
        }
    }

    pub(crate) fn fire_bridge_role_changed(&mut self, is_bridge: bool, reason: &str) {
        if let Some(mut callback) = self.callbacks.bridge_role_changed.take() {
            callback(self, is_bridge, reason);
            if self.callbacks.bridge_role_changed.is_none() {
                self.callbacks.bridge_role_changed = Some(callback);
            }
        }
    }

    pub(crate) fn fire_connectivity_changed(&mut self, available: bool) {
        if let Some(mut callback) = self.callbacks.connectivity_changed.take() {
            callback(self, available);
            if self.callbacks.connectivity_changed.is_none() {
                self.callbacks.connectivity_changed = Some(callback);
            }
        }
    }

    /// Run plugin handlers for a package type; true when consumed.
    pub(crate) fn dispatch_package_handlers(
        &mut self,
        type_id: u16,
        variant: &Variant,
        from_conn: ConnectionId,
    ) -> bool {
        let Some(mut list) = self.callbacks.packages.remove(&type_id) else { return false };
        let mut consumed = false;
        for handler in list.iter_mut() {
            if handler(self, variant, from_conn) {
                consumed = true;
                break;
            }
        }
        if let Some(mut registered_during) = self.callbacks.packages.remove(&type_id) {
            list.append(&mut registered_during);
        }
        self.callbacks.packages.insert(type_id, list);
        consumed
    }

    /// Per-node probe/executor plumbing used by the link glue.
    pub fn set_internet_probe(&mut self, probe: Box<dyn InternetProbe>) {
        self.gateway.probe = Some(probe);
    }
}
