//! Message routing and node-sync: envelope-level forwarding decisions plus
//! the subtree exchange that keeps the spanning tree converged.

use weft_proto::variant::NodeSyncPackage;
use weft_proto::{Routing, Variant};

use crate::buffer::{PRIORITY_HIGH, PRIORITY_NORMAL};
use crate::connection::ConnectionId;
use crate::scheduler::TaskKind;
use crate::transport::Transport;

use super::Mesh;

impl<T: Transport> Mesh<T> {
    /// Decode one inbound message and route it: forward, flood, or handle
    /// locally. Malformed messages are dropped without closing the link.
    pub(crate) fn route_message(&mut self, from_conn: ConnectionId, text: &str, now: u64) {
        let variant = match Variant::decode(text) {
            Ok(variant) => variant,
            Err(err) => {
                log::warn!("mesh({}): dropping undecodable message: {err}", self.node_id());
                return;
            }
        };

        match variant.routing() {
            Routing::Neighbor => self.handle_locally(from_conn, variant, now),
            Routing::Broadcast => {
                self.forward_broadcast(text, Some(from_conn));
                self.handle_locally(from_conn, variant, now);
            }
            Routing::Single => {
                if variant.dest() == self.node_id() {
                    self.handle_locally(from_conn, variant, now);
                } else {
                    self.forward_single(&variant, text);
                }
            }
        }
    }

    fn forward_single(&mut self, variant: &Variant, text: &str) {
        let dest = variant.dest();
        let Some(route) = self.find_route(dest) else {
            log::debug!("mesh({}): no route for forwarded message to {dest}", self.node_id());
            return;
        };
        let priority = match variant {
            Variant::GatewayData(pkg) => pkg.prio.min(3),
            Variant::GatewayAck(_) => PRIORITY_HIGH,
            _ => PRIORITY_NORMAL,
        };
        self.enqueue_on(route, text, priority);
    }

    fn handle_locally(&mut self, from_conn: ConnectionId, variant: Variant, now: u64) {
        match variant {
            Variant::NodeSyncRequest(pkg) => self.handle_node_sync(from_conn, pkg, true, now),
            Variant::NodeSyncReply(pkg) => self.handle_node_sync(from_conn, pkg, false, now),
            Variant::TimeSync(pkg) => self.handle_time_sync(from_conn, pkg),
            Variant::TimeDelay(pkg) => self.handle_time_delay(from_conn, pkg),
            Variant::Single(pkg) => {
                let from = pkg.from;
                self.fire_received(from, &pkg.msg);
            }
            Variant::Broadcast(pkg) => {
                let from = pkg.from;
                self.fire_received(from, &pkg.msg);
            }
            Variant::BridgeStatus(pkg) => self.handle_bridge_status(pkg, now),
            Variant::BridgeElection(pkg) => self.handle_bridge_election(pkg),
            Variant::BridgeTakeover(pkg) => self.handle_bridge_takeover(pkg, now),
            Variant::BridgeCoordination(pkg) => {
                log::debug!(
                    "mesh({}): bridge {} coordinating as {} (load {})",
                    self.node_id(),
                    pkg.from,
                    pkg.role,
                    pkg.load
                );
                self.touch_bridge_last_seen(pkg.from, now);
            }
            Variant::GatewayData(pkg) => self.handle_gateway_data(from_conn, pkg, now),
            Variant::GatewayAck(pkg) => self.handle_gateway_ack(pkg, now),
            Variant::GatewayHeartbeat(pkg) => self.handle_gateway_heartbeat(pkg, now),
            Variant::Plugin(ref pkg) => {
                let type_id = pkg.type_id;
                if !self.dispatch_package_handlers(type_id, &variant, from_conn) {
                    log::debug!(
                        "mesh({}): unhandled plugin package type {type_id}",
                        self.node_id()
                    );
                }
            }
        }
    }

    // ---- node-sync ------------------------------------------------------

    /// Periodic task: advertise our tree to the neighbor and arm the reply
    /// timeout.
    pub(crate) fn run_node_sync(&mut self, id: ConnectionId, now: u64) {
        let (neighbor, timeout_task) = {
            let Some(conn) = self.connection(id) else { return };
            (conn.neighbor_id, conn.timeout_task)
        };
        let tree = self.advertised_tree(neighbor);
        log::debug!("mesh({}): node-sync request to {neighbor}", self.node_id());
        let pkg = NodeSyncPackage::new(self.node_id(), neighbor, tree);
        let Ok(text) = Variant::NodeSyncRequest(pkg).encode() else { return };
        self.enqueue_on(id, &text, PRIORITY_HIGH);

        let fire_at = now + self.config.node_timeout_ms;
        match timeout_task {
            Some(task) => self.scheduler.restart_delayed(task, fire_at),
            None => {
                let task = self.scheduler.once(TaskKind::ConnectionTimeout(id), fire_at);
                if let Some(conn) = self.connection_mut(id) {
                    conn.timeout_task = Some(task);
                }
            }
        }
    }

    /// A neighbor advertised its subtree (request or reply).
    fn handle_node_sync(
        &mut self,
        id: ConnectionId,
        pkg: NodeSyncPackage,
        is_request: bool,
        now: u64,
    ) {
        let my_id = self.node_id();

        // A tree containing ourselves means the link closes a loop.
        if pkg.tree.contains(my_id) {
            log::warn!("mesh({my_id}): loop detected via {}, closing connection", pkg.from);
            self.close_connection(id, now);
            return;
        }

        // Two rooted halves cannot merge; the larger id yields so exactly
        // one side closes.
        if pkg.tree.is_rooted() && self.rooted_excluding(id) && my_id > pkg.from {
            log::warn!(
                "mesh({my_id}): root conflict with {}, yielding connection",
                pkg.from
            );
            self.close_connection(id, now);
            return;
        }

        let Some(conn) = self.connection_mut(id) else { return };
        let first_contact = conn.new_connection;

        if first_contact {
            // The same neighbor already reachable elsewhere is a duplicate
            // path; refuse it before it pollutes the layout.
            if self.find_route_excluding(pkg.from, id).is_some() {
                log::warn!(
                    "mesh({my_id}): duplicate path to {}, closing connection",
                    pkg.from
                );
                self.close_connection(id, now);
                return;
            }
        }

        let Some(conn) = self.connection_mut(id) else { return };
        conn.neighbor_id = pkg.from;
        conn.new_connection = false;

        let mut advertised = pkg.tree.clone();
        advertised.node_id = pkg.from;
        let changed = conn.tree != advertised;
        conn.tree = advertised;

        let timeout_task = conn.timeout_task;
        if let Some(task) = timeout_task {
            self.scheduler.restart_delayed(task, now + self.config.node_timeout_ms);
        }

        if is_request {
            let tree = self.advertised_tree(pkg.from);
            let reply = NodeSyncPackage::new(my_id, pkg.from, tree);
            if let Ok(text) = Variant::NodeSyncReply(reply).encode() {
                self.enqueue_on(id, &text, PRIORITY_HIGH);
            }
        }

        if first_contact {
            log::info!("mesh({my_id}): connection to {} established", pkg.from);
            let first_sync = now + self.config.time_sync_initial_delay_ms;
            let task = self.scheduler.every(
                TaskKind::TimeSync(id),
                first_sync,
                self.config.time_sync_interval_ms,
            );
            if let Some(conn) = self.connection_mut(id) {
                conn.time_sync_task = Some(task);
            }
            self.fire_new_connection(pkg.from);
        }

        if changed || first_contact {
            log::debug!("mesh({my_id}): layout changed via {}", pkg.from);
            self.fire_changed_connections(pkg.from);
            if self.gateway.is_bridge && first_contact {
                // Routing toward the newcomer is only authoritative now, so
                // the bridge introduces itself shortly after promotion.
                self.scheduler.once(
                    TaskKind::GreetNeighbor(id),
                    now + self.config.bridge_greet_delay_ms,
                );
            }
            // Push the new layout to the rest of the neighbors right away
            // instead of waiting out their periodic sync.
            let others: Vec<ConnectionId> = self
                .iter_live()
                .filter(|conn| conn.id != id && conn.neighbor_id != 0)
                .map(|conn| conn.id)
                .collect();
            for other in others {
                self.run_node_sync(other, now);
            }
        }
    }

    /// Our tree as advertised to a specific neighbor: their own subtree is
    /// removed so they never see themselves through us.
    fn advertised_tree(&self, neighbor: u32) -> weft_proto::NodeTree {
        let mut tree = self.as_node_tree();
        if neighbor != 0 {
            tree.subs.retain(|sub| sub.node_id != neighbor);
        }
        tree
    }

    /// Whether the mesh minus the given connection's subtree claims a root.
    fn rooted_excluding(&self, exclude: ConnectionId) -> bool {
        if self.is_root() {
            return true;
        }
        self.iter_live()
            .filter(|conn| conn.id != exclude && conn.neighbor_id != 0)
            .any(|conn| conn.tree.is_rooted())
    }
}
