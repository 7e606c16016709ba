//! Session-side gateway runtime: bridge role lifecycle, status/heartbeat
//! broadcasting, failover election wiring, the Internet relay path on both
//! the client and the bridge side, and the offline queue surface.

use std::collections::HashMap;
use std::path::PathBuf;

use weft_proto::variant::{
    BridgeElectionPackage, BridgeStatusPackage, BridgeTakeoverPackage, GatewayAckPackage,
    GatewayDataPackage, GatewayHeartbeatPackage,
};
use weft_proto::{Routing, Variant};

use crate::buffer::{PRIORITY_HIGH, PRIORITY_NORMAL};
use crate::connection::ConnectionId;
use crate::gateway::{
    classify_http, BridgeInfo, ConfigError, ElectionCandidate, ElectionManager, ElectionOutcome,
    GatewayConfig, GatewayMessageHandler, HandlerMetrics, HealthChecker, HttpExecutor,
    HttpOutcome, HttpResult, InternetCallback, InternetProbe, InternetResponse, InternetStatus,
    PendingInternetRequest,
};
use crate::queue::{MessageQueue, QueueStateCallback, QueueStats};
use crate::scheduler::{TaskId, TaskKind};
use crate::transport::Transport;

use super::Mesh;

const ELECTION_TRIGGER_DELAY_MS: u64 = 2_000;
const ELECTION_EVALUATE_SLACK_MS: u64 = 100;
const REASON_ELECTION_WINNER: &str = "Election winner - best router signal";
const REASON_LOST_ELECTION: &str = "Another node won election";

/// All gateway-side state owned by the session.
pub(crate) struct GatewayState {
    pub config: GatewayConfig,
    pub send_to_internet_enabled: bool,
    pub queue_enabled: bool,
    pub health: HealthChecker,
    pub probe: Option<Box<dyn InternetProbe>>,
    pub http: Option<Box<dyn HttpExecutor>>,
    pub election: ElectionManager,
    pub handler: GatewayMessageHandler,
    pub pending: HashMap<u32, PendingInternetRequest>,
    pub message_counter: u16,
    pub is_bridge: bool,
    pub router_rssi: Option<i8>,
    pub router_channel: u8,
    pub router_link_up: bool,
    pub gateway_ip: String,
    pub free_memory: u32,
    pub status_task: Option<TaskId>,
    pub heartbeat_task: Option<TaskId>,
    pub check_task: Option<TaskId>,
    pub watch_task: Option<TaskId>,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self {
            config: GatewayConfig::default(),
            send_to_internet_enabled: false,
            queue_enabled: false,
            health: HealthChecker::default(),
            probe: None,
            http: None,
            election: ElectionManager::default(),
            handler: GatewayMessageHandler::default(),
            pending: HashMap::new(),
            message_counter: 0,
            is_bridge: false,
            router_rssi: None,
            router_channel: 0,
            router_link_up: false,
            gateway_ip: String::new(),
            free_memory: 0,
            status_task: None,
            heartbeat_task: None,
            check_task: None,
            watch_task: None,
        }
    }
}

impl GatewayState {
    pub fn stop(&mut self) {
        self.pending.clear();
        self.handler.clear();
        self.is_bridge = false;
        self.status_task = None;
        self.heartbeat_task = None;
        self.check_task = None;
        self.watch_task = None;
    }
}

impl<T: Transport> Mesh<T> {
    // ---- configuration --------------------------------------------------

    /// Install a validated shared-gateway configuration.
    pub fn configure_gateway(&mut self, config: GatewayConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.gateway.handler.configure(
            config.duplicate_tracking_timeout as u64,
            config.max_tracked_messages as usize,
        );
        self.gateway.health = HealthChecker::from_config(&config);

        if let Some(task) = self.gateway.watch_task.take() {
            self.scheduler.cancel(task);
        }
        if config.enabled || config.can_participate_in_election() {
            let now = self.now_ms();
            let interval = self.config.heartbeat_watch_interval_ms;
            self.gateway.watch_task =
                Some(self.scheduler.every(TaskKind::HeartbeatWatch, now + interval, interval));
        }
        self.gateway.config = config;
        Ok(())
    }

    pub fn gateway_config(&self) -> &GatewayConfig {
        &self.gateway.config
    }

    /// sendToInternet is opt-in; disabled calls fail fast.
    pub fn enable_send_to_internet(&mut self, enabled: bool) {
        self.gateway.send_to_internet_enabled = enabled;
    }

    pub fn set_http_executor(&mut self, executor: Box<dyn HttpExecutor>) {
        self.gateway.http = Some(executor);
    }

    /// Link glue reports the router-side state: scan RSSI, channel,
    /// association and the gateway IP.
    pub fn set_router_link(
        &mut self,
        rssi: Option<i8>,
        channel: u8,
        link_up: bool,
        gateway_ip: &str,
    ) {
        self.gateway.router_rssi = rssi;
        self.gateway.router_channel = channel;
        self.gateway.router_link_up = link_up;
        self.gateway.gateway_ip = gateway_ip.to_string();
    }

    /// Host-reported free heap, used as an election tie-break.
    pub fn set_free_memory(&mut self, bytes: u32) {
        self.gateway.free_memory = bytes;
    }

    pub fn set_election_timeout_ms(&mut self, timeout_ms: u32) {
        self.gateway.election.set_timeout_ms(timeout_ms);
    }

    pub fn set_min_election_rssi(&mut self, threshold_dbm: i8) {
        self.gateway.election.set_min_rssi_dbm(threshold_dbm);
    }

    // ---- bridge queries -------------------------------------------------

    pub fn bridges(&self) -> Vec<BridgeInfo> {
        self.known_bridges.clone()
    }

    /// Healthy, Internet-connected bridge with the best router signal.
    pub fn primary_bridge(&self) -> Option<BridgeInfo> {
        let now = self.now_ms();
        let timeout = self.config.bridge_timeout_ms;
        self.known_bridges
            .iter()
            .filter(|bridge| bridge.is_healthy(now, timeout) && bridge.internet_connected)
            .max_by_key(|bridge| bridge.router_rssi)
            .cloned()
    }

    /// The most recently heard-from bridge, healthy or not.
    pub fn last_known_bridge(&self) -> Option<BridgeInfo> {
        self.last_known_bridge.clone()
    }

    /// Whether any healthy bridge currently reports Internet.
    pub fn has_internet_connection(&self) -> bool {
        let now = self.now_ms();
        let timeout = self.config.bridge_timeout_ms;
        self.known_bridges
            .iter()
            .any(|bridge| bridge.is_healthy(now, timeout) && bridge.internet_connected)
    }

    pub fn is_bridge(&self) -> bool {
        self.gateway.is_bridge
    }

    pub fn internet_status(&self) -> InternetStatus {
        self.gateway.health.status().clone()
    }

    pub fn gateway_metrics(&self) -> HandlerMetrics {
        self.gateway.handler.metrics()
    }

    pub fn pending_request_count(&self) -> usize {
        self.gateway.pending.len()
    }

    // ---- bridge role lifecycle -----------------------------------------

    /// Take the bridge role: become root, start the periodic status,
    /// heartbeat and health tasks, and announce the takeover. Radio
    /// reconfiguration is the link layer's job, driven by the role
    /// callback.
    pub fn become_bridge(&mut self, reason: &str) {
        let now = self.now_ms();
        let previous = self.primary_bridge().map(|bridge| bridge.node_id).unwrap_or(0);

        self.set_root(true);
        self.set_contains_root(true);
        self.gateway.is_bridge = true;
        self.gateway.election.record_role_change(now);

        self.cancel_bridge_tasks();
        // Verify the uplink before the first status goes out, so the mesh
        // never learns a freshly promoted bridge as offline by accident.
        self.run_internet_check(now);
        self.gateway.status_task = Some(self.scheduler.every(
            TaskKind::BridgeStatusBroadcast,
            now,
            self.config.bridge_status_interval_ms,
        ));
        self.gateway.heartbeat_task = Some(self.scheduler.every(
            TaskKind::GatewayHeartbeat,
            now,
            self.gateway.config.gateway_heartbeat_interval as u64,
        ));
        if self.gateway.probe.is_some() {
            self.gateway.check_task = Some(self.scheduler.every(
                TaskKind::InternetCheck,
                now,
                self.gateway.config.internet_check_interval as u64,
            ));
        }

        let own = self.self_bridge_info(now);
        self.upsert_bridge(own);

        let takeover = BridgeTakeoverPackage {
            from: self.node_id(),
            dest: 0,
            routing: Routing::Broadcast,
            previous_bridge: previous,
            reason: reason.to_string(),
            router_rssi: self.gateway.router_rssi.unwrap_or(0),
            timestamp: self.node_time(),
        };
        self.send_package(&Variant::BridgeTakeover(takeover), PRIORITY_HIGH);

        log::info!("mesh({}): promoted to bridge ({reason})", self.node_id());
        self.fire_bridge_role_changed(true, reason);
        let me = self.node_id();
        self.fire_gateway_changed(me, previous, reason);
    }

    /// Give the bridge role up, typically after another node's takeover.
    pub fn stand_down_bridge(&mut self, reason: &str) {
        if !self.gateway.is_bridge {
            return;
        }
        self.gateway.is_bridge = false;
        self.set_root(false);
        self.set_contains_root(false);
        self.cancel_bridge_tasks();
        let now = self.now_ms();
        self.gateway.election.record_role_change(now);
        log::info!("mesh({}): standing down as bridge ({reason})", self.node_id());
        self.fire_bridge_role_changed(false, reason);
    }

    fn cancel_bridge_tasks(&mut self) {
        for task in [
            self.gateway.status_task.take(),
            self.gateway.heartbeat_task.take(),
            self.gateway.check_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.scheduler.cancel(task);
        }
    }

    // ---- election -------------------------------------------------------

    /// Open an election round: scan result check, self-candidacy,
    /// candidacy broadcast, evaluation timer.
    pub fn start_bridge_election(&mut self) {
        let now = self.now_ms();
        if !self.gateway.config.can_participate_in_election() {
            log::debug!("mesh({}): not eligible for bridge election", self.node_id());
            return;
        }
        if !self.gateway.election.begin(now) {
            return;
        }
        let Some(rssi) = self.gateway.router_rssi else {
            log::warn!("mesh({}): router not visible, aborting election", self.node_id());
            self.gateway.election.abort();
            return;
        };

        log::info!("mesh({}): bridge election started (rssi {rssi} dBm)", self.node_id());
        self.gateway.election.start_collecting();
        self.gateway.election.add_candidate(ElectionCandidate {
            node_id: self.node_id(),
            router_rssi: rssi,
            uptime: now as u32,
            free_memory: self.gateway.free_memory,
        });

        let candidacy = BridgeElectionPackage {
            from: self.node_id(),
            dest: 0,
            routing: Routing::Broadcast,
            router_rssi: rssi,
            uptime: now as u32,
            free_memory: self.gateway.free_memory,
            timestamp: self.node_time(),
            router_ssid: self.gateway.config.router_ssid.clone(),
        };
        self.send_package(&Variant::BridgeElection(candidacy), PRIORITY_HIGH);

        let evaluate_at =
            now + self.gateway.election.timeout_ms() as u64 + ELECTION_EVALUATE_SLACK_MS;
        self.scheduler.once(TaskKind::ElectionEvaluate, evaluate_at);
    }

    pub(crate) fn handle_bridge_election(&mut self, pkg: BridgeElectionPackage) {
        self.gateway.election.add_candidate(ElectionCandidate {
            node_id: pkg.from,
            router_rssi: pkg.router_rssi,
            uptime: pkg.uptime,
            free_memory: pkg.free_memory,
        });
    }

    pub(crate) fn run_election_evaluate(&mut self, _now: u64) {
        match self.gateway.election.evaluate() {
            ElectionOutcome::Winner(winner) if winner.node_id == self.node_id() => {
                self.become_bridge(REASON_ELECTION_WINNER);
            }
            ElectionOutcome::Winner(winner) => {
                log::info!(
                    "mesh({}): election winner is {}, staying regular node",
                    self.node_id(),
                    winner.node_id
                );
            }
            ElectionOutcome::RejectedBelowThreshold(candidate) => {
                log::info!(
                    "mesh({}): election rejected, sole candidate {} below {} dBm",
                    self.node_id(),
                    candidate.router_rssi,
                    self.gateway.election.min_rssi_dbm()
                );
            }
            ElectionOutcome::NoCandidates => {
                log::error!("mesh({}): election closed without candidates", self.node_id());
            }
        }
    }

    /// Failure detected somewhere; open an election shortly unless one is
    /// already pending.
    fn trigger_election_soon(&mut self, now: u64) {
        if !self.gateway.config.can_participate_in_election() {
            return;
        }
        log::info!("mesh({}): no healthy bridge left, scheduling election", self.node_id());
        self.scheduler.once(TaskKind::ElectionStart, now + ELECTION_TRIGGER_DELAY_MS);
    }

    // ---- bridge table ---------------------------------------------------

    pub(crate) fn handle_bridge_status(&mut self, pkg: BridgeStatusPackage, now: u64) {
        let was_connected = self
            .known_bridges
            .iter()
            .find(|bridge| bridge.node_id == pkg.from)
            .map(|bridge| bridge.internet_connected)
            .unwrap_or(false);

        self.upsert_bridge(BridgeInfo {
            node_id: pkg.from,
            internet_connected: pkg.internet_connected,
            router_rssi: pkg.router_rssi,
            router_channel: pkg.router_channel,
            last_seen: now,
            uptime: pkg.uptime,
            gateway_ip: pkg.gateway_ip.clone(),
            timestamp: pkg.timestamp,
        });
        log::debug!(
            "mesh({}): bridge {} status, internet {}",
            self.node_id(),
            pkg.from,
            if pkg.internet_connected { "connected" } else { "disconnected" }
        );

        if was_connected != pkg.internet_connected {
            self.fire_bridge_status_changed(pkg.from, pkg.internet_connected);
        }
        if !pkg.internet_connected && !self.has_internet_connection() {
            self.trigger_election_soon(now);
        }
    }

    pub(crate) fn handle_gateway_heartbeat(&mut self, pkg: GatewayHeartbeatPackage, now: u64) {
        let was_connected = self
            .known_bridges
            .iter()
            .find(|bridge| bridge.node_id == pkg.from)
            .map(|bridge| bridge.internet_connected)
            .unwrap_or(false);

        let existing = self.known_bridges.iter().find(|bridge| bridge.node_id == pkg.from);
        let mut info = existing.cloned().unwrap_or(BridgeInfo {
            node_id: pkg.from,
            ..BridgeInfo::default()
        });
        info.internet_connected = pkg.has_internet;
        info.router_rssi = pkg.router_rssi;
        info.uptime = pkg.uptime;
        info.last_seen = now;
        info.timestamp = pkg.timestamp;
        self.upsert_bridge(info);

        if was_connected != pkg.has_internet {
            self.fire_bridge_status_changed(pkg.from, pkg.has_internet);
            if !pkg.has_internet && !self.has_internet_connection() {
                self.trigger_election_soon(now);
            }
        }
    }

    pub(crate) fn handle_bridge_takeover(&mut self, pkg: BridgeTakeoverPackage, now: u64) {
        if pkg.from == self.node_id() {
            return;
        }
        log::info!(
            "mesh({}): bridge takeover, {} replaced {} ({})",
            self.node_id(),
            pkg.from,
            pkg.previous_bridge,
            pkg.reason
        );
        let existing = self.known_bridges.iter().find(|bridge| bridge.node_id == pkg.from);
        let mut info = existing.cloned().unwrap_or(BridgeInfo {
            node_id: pkg.from,
            ..BridgeInfo::default()
        });
        info.router_rssi = pkg.router_rssi;
        info.last_seen = now;
        info.timestamp = pkg.timestamp;
        self.upsert_bridge(info);

        if self.gateway.is_bridge {
            self.stand_down_bridge(REASON_LOST_ELECTION);
        } else {
            self.fire_bridge_role_changed(false, REASON_LOST_ELECTION);
        }
        let reason = pkg.reason.clone();
        self.fire_gateway_changed(pkg.from, pkg.previous_bridge, &reason);
    }

    pub(crate) fn touch_bridge_last_seen(&mut self, node_id: u32, now: u64) {
        if let Some(bridge) = self.known_bridges.iter_mut().find(|bridge| bridge.node_id == node_id)
        {
            bridge.last_seen = now;
        }
    }

    fn upsert_bridge(&mut self, info: BridgeInfo) {
        self.last_known_bridge = Some(info.clone());
        match self.known_bridges.iter_mut().find(|bridge| bridge.node_id == info.node_id) {
            Some(existing) => *existing = info,
            None => self.known_bridges.push(info),
        }
    }

    fn self_bridge_info(&self, now: u64) -> BridgeInfo {
        BridgeInfo {
            node_id: self.node_id(),
            internet_connected: self.gateway.router_link_up && self.gateway.health.available(),
            router_rssi: self.gateway.router_rssi.unwrap_or(0),
            router_channel: self.gateway.router_channel,
            last_seen: now,
            uptime: now as u32,
            gateway_ip: self.gateway.gateway_ip.clone(),
            timestamp: self.node_time(),
        }
    }

    // ---- periodic bridge tasks -----------------------------------------

    pub(crate) fn run_bridge_status_broadcast(&mut self, now: u64) {
        if !self.gateway.is_bridge {
            return;
        }
        let info = self.self_bridge_info(now);
        self.upsert_bridge(info.clone());
        let pkg = BridgeStatusPackage {
            from: self.node_id(),
            dest: 0,
            routing: Routing::Broadcast,
            internet_connected: info.internet_connected,
            router_rssi: info.router_rssi,
            router_channel: info.router_channel,
            uptime: info.uptime,
            gateway_ip: info.gateway_ip,
            timestamp: info.timestamp,
        };
        log::debug!(
            "mesh({}): broadcasting bridge status (internet {})",
            self.node_id(),
            if pkg.internet_connected { "connected" } else { "disconnected" }
        );
        self.send_package(&Variant::BridgeStatus(pkg), PRIORITY_NORMAL);
    }

    pub(crate) fn run_gateway_heartbeat(&mut self, now: u64) {
        if !self.gateway.is_bridge {
            return;
        }
        let is_primary = self
            .primary_bridge()
            .map(|bridge| bridge.node_id == self.node_id())
            .unwrap_or(false);
        let pkg = GatewayHeartbeatPackage {
            from: self.node_id(),
            dest: 0,
            routing: Routing::Broadcast,
            is_primary,
            has_internet: self.gateway.router_link_up && self.gateway.health.available(),
            router_rssi: self.gateway.router_rssi.unwrap_or(0),
            uptime: now as u32,
            timestamp: self.node_time(),
        };
        self.send_package(&Variant::GatewayHeartbeat(pkg), PRIORITY_HIGH);
    }

    /// Expire bridges whose heartbeat stopped; may trigger failover.
    pub(crate) fn run_heartbeat_watch(&mut self, now: u64) {
        let failure_timeout = self.gateway.config.gateway_failure_timeout as u64;
        let me = self.node_id();
        let mut expired = Vec::new();
        for bridge in self.known_bridges.iter_mut() {
            if bridge.node_id != me
                && bridge.internet_connected
                && now.wrapping_sub(bridge.last_seen) > failure_timeout
            {
                bridge.internet_connected = false;
                expired.push(bridge.node_id);
            }
        }
        for node_id in &expired {
            log::warn!("mesh({me}): bridge {node_id} heartbeat expired");
            self.fire_bridge_status_changed(*node_id, false);
        }
        if !expired.is_empty() && !self.has_internet_connection() {
            self.trigger_election_soon(now);
        }
    }

    pub(crate) fn run_internet_check(&mut self, now: u64) {
        let Some(mut probe) = self.gateway.probe.take() else { return };
        let edge = self.gateway.health.check_now(probe.as_mut(), now);
        self.gateway.probe = Some(probe);

        if let Some(available) = edge {
            let me = self.node_id();
            if self.gateway.is_bridge {
                let info = self.self_bridge_info(now);
                self.upsert_bridge(info);
                // The mesh should hear about the transition now, not at the
                // next periodic broadcast.
                if let Some(task) = self.gateway.status_task {
                    self.scheduler.restart_delayed(task, now);
                }
            }
            self.fire_connectivity_changed(available);
            if self.gateway.is_bridge {
                self.fire_bridge_status_changed(me, available);
            }
        }
    }

    /// A freshly promoted neighbor learns the bridge's status by unicast
    /// before it may rely on it.
    pub(crate) fn run_greet_neighbor(&mut self, id: ConnectionId, now: u64) {
        if !self.gateway.is_bridge {
            return;
        }
        let Some(conn) = self.connection(id) else { return };
        let neighbor = conn.neighbor_id;
        if neighbor == 0 {
            return;
        }
        let info = self.self_bridge_info(now);
        let pkg = BridgeStatusPackage {
            from: self.node_id(),
            dest: neighbor,
            routing: Routing::Single,
            internet_connected: info.internet_connected,
            router_rssi: info.router_rssi,
            router_channel: info.router_channel,
            uptime: info.uptime,
            gateway_ip: info.gateway_ip,
            timestamp: info.timestamp,
        };
        if let Ok(text) = Variant::BridgeStatus(pkg).encode() {
            log::debug!("mesh({}): greeting new neighbor {neighbor} with status", self.node_id());
            self.enqueue_on(id, &text, PRIORITY_HIGH);
        }
    }

    // ---- client side: sendToInternet -----------------------------------

    /// Relay a request to the mesh's primary gateway. Returns the message
    /// id, or 0 after invoking the callback with the preflight failure.
    pub fn send_to_internet(
        &mut self,
        url: &str,
        payload: &str,
        mut callback: InternetCallback,
    ) -> u32 {
        if !self.gateway.send_to_internet_enabled {
            callback(&InternetResponse::failure(0, "sendToInternet not enabled"));
            return 0;
        }
        if !self.has_active_mesh_connections() {
            callback(&InternetResponse::failure(0, "No mesh connections"));
            return 0;
        }
        let Some(bridge) = self.primary_bridge() else {
            callback(&InternetResponse::failure(0, "No healthy bridge"));
            return 0;
        };

        let now = self.now_ms();
        self.gateway.message_counter = self.gateway.message_counter.wrapping_add(1);
        if self.gateway.message_counter == 0 {
            self.gateway.message_counter = 1;
        }
        let message_id = ((self.node_id() & 0xFFFF) << 16) | self.gateway.message_counter as u32;

        let pkg = GatewayDataPackage {
            from: self.node_id(),
            dest: bridge.node_id,
            routing: Routing::Single,
            message_id,
            origin: self.node_id(),
            ts: self.node_time(),
            prio: PRIORITY_NORMAL,
            destination: url.to_string(),
            payload: payload.to_string(),
            content: "application/json".to_string(),
            retry: 0,
            ack: true,
        };
        if !self.send_variant(&Variant::GatewayData(pkg), PRIORITY_NORMAL) {
            callback(&InternetResponse::failure(message_id, "No route to bridge"));
            return 0;
        }

        let timeout_task = self.scheduler.once(
            TaskKind::RequestTimeout(message_id),
            now + self.config.request_timeout_ms as u64,
        );
        self.gateway.pending.insert(
            message_id,
            PendingInternetRequest {
                message_id,
                created_ms: now,
                retry_count: 0,
                max_retries: self.gateway.config.message_retry_count,
                priority: PRIORITY_NORMAL,
                timeout_ms: self.config.request_timeout_ms,
                retry_delay_ms: self.gateway.config.retry_interval,
                gateway_node_id: bridge.node_id,
                destination: url.to_string(),
                payload: payload.to_string(),
                content_type: "application/json".to_string(),
                callback: Some(callback),
                timeout_task: Some(timeout_task),
                retry_task: None,
            },
        );
        log::debug!(
            "mesh({}): internet request {message_id:#010x} via bridge {}",
            self.node_id(),
            bridge.node_id
        );
        message_id
    }

    pub(crate) fn handle_gateway_ack(&mut self, pkg: GatewayAckPackage, now: u64) {
        let Some(mut pending) = self.gateway.pending.remove(&pkg.message_id) else {
            log::debug!(
                "mesh({}): ack for unknown request {:#010x}",
                self.node_id(),
                pkg.message_id
            );
            return;
        };

        if pkg.success {
            self.finish_request(
                pending,
                InternetResponse {
                    message_id: pkg.message_id,
                    success: true,
                    http_status: pkg.http_status,
                    error: String::new(),
                },
            );
            return;
        }

        let retryable = classify_http(pkg.http_status as i32) == HttpOutcome::RetryableFailure;
        if retryable && pending.retry_count < pending.max_retries {
            let delay = pending.next_retry_delay_ms();
            log::debug!(
                "mesh({}): request {:#010x} failed retryably (http {}), retry in {delay} ms",
                self.node_id(),
                pkg.message_id,
                pkg.http_status
            );
            pending.retry_task =
                Some(self.scheduler.once(TaskKind::RequestRetry(pkg.message_id), now + delay));
            self.gateway.pending.insert(pkg.message_id, pending);
        } else {
            let error = if pkg.error.is_empty() {
                format!("HTTP error {}", pkg.http_status)
            } else {
                pkg.error.clone()
            };
            self.finish_request(
                pending,
                InternetResponse {
                    message_id: pkg.message_id,
                    success: false,
                    http_status: pkg.http_status,
                    error,
                },
            );
        }
    }

    pub(crate) fn run_request_timeout(&mut self, message_id: u32) {
        let Some(mut pending) = self.gateway.pending.remove(&message_id) else { return };
        pending.timeout_task = None;
        log::warn!("mesh({}): internet request {message_id:#010x} timed out", self.node_id());
        self.finish_request(pending, InternetResponse::failure(message_id, "Request timed out"));
    }

    pub(crate) fn run_request_retry(&mut self, message_id: u32, _now: u64) {
        let Some(mut pending) = self.gateway.pending.remove(&message_id) else { return };
        pending.retry_task = None;
        pending.retry_count += 1;

        // Same preflight as the original submission; a mesh partition must
        // not be papered over by stale bridge records.
        if !self.has_active_mesh_connections() {
            self.finish_request(
                pending,
                InternetResponse::failure(message_id, "No mesh connections"),
            );
            return;
        }
        let Some(bridge) = self.primary_bridge() else {
            self.finish_request(pending, InternetResponse::failure(message_id, "No healthy bridge"));
            return;
        };
        pending.gateway_node_id = bridge.node_id;

        let pkg = GatewayDataPackage {
            from: self.node_id(),
            dest: bridge.node_id,
            routing: Routing::Single,
            message_id,
            origin: self.node_id(),
            ts: self.node_time(),
            prio: pending.priority,
            destination: pending.destination.clone(),
            payload: pending.payload.clone(),
            content: pending.content_type.clone(),
            retry: pending.retry_count,
            ack: true,
        };
        if !self.send_variant(&Variant::GatewayData(pkg), pending.priority) {
            self.finish_request(pending, InternetResponse::failure(message_id, "No route to bridge"));
            return;
        }
        log::debug!(
            "mesh({}): retry {} for request {message_id:#010x}",
            self.node_id(),
            pending.retry_count
        );
        self.gateway.pending.insert(message_id, pending);
    }

    fn finish_request(&mut self, mut pending: PendingInternetRequest, response: InternetResponse) {
        if let Some(task) = pending.timeout_task.take() {
            self.scheduler.cancel(task);
        }
        if let Some(task) = pending.retry_task.take() {
            self.scheduler.cancel(task);
        }
        if let Some(mut callback) = pending.callback.take() {
            callback(&response);
        }
    }

    // ---- bridge side: relay handler ------------------------------------

    pub(crate) fn handle_gateway_data(
        &mut self,
        from_conn: ConnectionId,
        pkg: GatewayDataPackage,
        now: u64,
    ) {
        if !self.gateway.is_bridge {
            log::warn!(
                "mesh({}): gateway data from {} but this node is no gateway",
                self.node_id(),
                pkg.origin
            );
            if pkg.ack {
                self.send_gateway_ack(&pkg, false, 0, "Node is not a gateway");
            }
            return;
        }

        if !self.gateway.handler.begin_processing(pkg.message_id, pkg.origin, now) {
            return;
        }

        // HTTP may legitimately run for tens of seconds; the mesh idle
        // timeout must not kill the reply path meanwhile. It re-arms on the
        // neighbor's next node-sync.
        let timeout_task = self.connection(from_conn).and_then(|conn| conn.timeout_task);
        if let Some(task) = timeout_task {
            self.scheduler.suspend(task);
        }

        let reachable = self.gateway.router_link_up && self.gateway.health.available();
        let (success, http_status, error) = if !reachable {
            (false, 0, "Router has no internet access".to_string())
        } else {
            let mut http = self.gateway.http.take();
            let result = match http.as_mut() {
                Some(executor) => executor.execute(&pkg.destination, &pkg.payload, &pkg.content),
                None => HttpResult {
                    status: 0,
                    error: Some("No HTTP executor configured".to_string()),
                },
            };
            self.gateway.http = http;

            let status_u16 = result.status.clamp(0, u16::MAX as i32) as u16;
            match classify_http(result.status) {
                HttpOutcome::Success => (true, status_u16, String::new()),
                HttpOutcome::RetryableFailure if (200..300).contains(&result.status) => {
                    (false, status_u16, crate::gateway::ERROR_AMBIGUOUS_RESPONSE.to_string())
                }
                _ => {
                    let error = result
                        .error
                        .unwrap_or_else(|| format!("HTTP error {}", result.status));
                    (false, status_u16, error)
                }
            }
        };

        log::info!(
            "mesh({}): relayed request {:#010x} from {}: {} (http {http_status})",
            self.node_id(),
            pkg.message_id,
            pkg.origin,
            if success { "delivered" } else { "failed" }
        );

        if pkg.ack && self.send_gateway_ack(&pkg, success, http_status, &error) {
            self.gateway.handler.mark_ack_sent(pkg.message_id, pkg.origin);
        }
    }

    fn send_gateway_ack(
        &mut self,
        pkg: &GatewayDataPackage,
        success: bool,
        http_status: u16,
        error: &str,
    ) -> bool {
        let ack = GatewayAckPackage {
            from: self.node_id(),
            dest: pkg.origin,
            routing: Routing::Single,
            message_id: pkg.message_id,
            origin: pkg.origin,
            success,
            http_status,
            error: error.to_string(),
            ts: self.node_time(),
        };
        self.send_variant(&Variant::GatewayAck(ack), PRIORITY_HIGH)
    }

    // ---- offline queue --------------------------------------------------

    /// Turn the offline store on, optionally persisted as JSON lines.
    pub fn enable_message_queue(&mut self, max_size: usize, storage: Option<PathBuf>) {
        self.queue = MessageQueue::new(max_size, storage);
        self.gateway.queue_enabled = true;
    }

    /// Queue a payload for later delivery; 0 when rejected or disabled.
    pub fn queue_message(&mut self, payload: &str, destination: &str, priority: u8) -> u32 {
        if !self.gateway.queue_enabled {
            log::error!("mesh({}): message queue not enabled", self.node_id());
            return 0;
        }
        let now = self.now_ms();
        self.queue.queue_message(payload, destination, priority, now)
    }

    /// Retry every queued entry through `send`; returns how many went out.
    pub fn flush_message_queue<F>(&mut self, send: F) -> u32
    where
        F: FnMut(&str, &str) -> bool,
    {
        if !self.gateway.queue_enabled {
            return 0;
        }
        self.queue.flush(send)
    }

    pub fn queued_message_count(&self) -> u32 {
        self.queue.count()
    }

    pub fn queued_message_count_by_priority(&self, priority: u8) -> u32 {
        self.queue.count_by_priority(priority)
    }

    pub fn prune_message_queue(&mut self, max_age_hours: u64) -> u32 {
        let now = self.now_ms();
        self.queue.prune(max_age_hours, now)
    }

    pub fn clear_message_queue(&mut self) {
        self.queue.clear();
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn on_queue_state_changed(&mut self, callback: QueueStateCallback) {
        self.queue.on_state_changed(callback);
    }

    pub fn set_max_queue_retry_attempts(&mut self, attempts: u32) {
        self.queue.set_max_retry_attempts(attempts);
    }
}
