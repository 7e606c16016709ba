//! Distributed time synchronization.
//!
//! Four-timestamp offset estimation between direct neighbors, with an
//! authority-aware adoption decision: nodes holding a real time source win,
//! then the larger half of the mesh, then the smaller node id.

use weft_proto::variant::{
    TimeDelayPackage, TimeSyncPackage, TIME_STAGE_ADOPT_ME, TIME_STAGE_REPLY, TIME_STAGE_REQUEST,
};
use weft_proto::{NodeTree, Variant};

use crate::buffer::PRIORITY_HIGH;
use crate::clock::us_diff;
use crate::connection::ConnectionId;
use crate::transport::Transport;

use super::Mesh;

/// Above this residual offset the node schedules fresh syncs so the whole
/// tree keeps converging instead of waiting out the periodic interval.
const RESYNC_THRESHOLD_US: i64 = 10_000;
const RESYNC_DELAY_MS: u64 = 200;

/// Whether `ours` should adopt time from the neighbor advertising `theirs`.
///
/// `ours` is the local tree with the neighbor's subtree removed, so the two
/// arguments are the two halves the link splits the mesh into.
pub(crate) fn adopt(ours: &NodeTree, theirs: &NodeTree) -> bool {
    if theirs.has_time_authority && !ours.has_time_authority {
        return true;
    }
    if ours.has_time_authority && !theirs.has_time_authority {
        return false;
    }
    let our_size = ours.size();
    let their_size = theirs.size();
    if their_size != our_size {
        return their_size > our_size;
    }
    theirs.node_id < ours.node_id
}

impl<T: Transport> Mesh<T> {
    /// Periodic task: run the adoption decision against one neighbor and
    /// start the exchange in the right direction.
    pub(crate) fn run_time_sync(&mut self, id: ConnectionId, _now: u64) {
        let Some(conn) = self.connection(id) else { return };
        if conn.neighbor_id == 0 {
            return;
        }
        let neighbor = conn.neighbor_id;
        let theirs = conn.tree.clone();
        let mut ours = self.as_node_tree();
        ours.subs.retain(|sub| sub.node_id != neighbor);

        let pkg = if adopt(&ours, &theirs) {
            log::debug!("mesh({}): requesting time from {neighbor}", self.node_id());
            TimeSyncPackage::request(self.node_id(), neighbor, self.node_time())
        } else {
            log::debug!("mesh({}): asking {neighbor} to adopt our time", self.node_id());
            TimeSyncPackage::adopt_me(self.node_id(), neighbor)
        };
        let Ok(text) = Variant::TimeSync(pkg).encode() else { return };
        self.enqueue_on(id, &text, PRIORITY_HIGH);
    }

    pub(crate) fn handle_time_sync(&mut self, from_conn: ConnectionId, pkg: TimeSyncPackage) {
        match pkg.msg.stage {
            TIME_STAGE_ADOPT_ME => {
                // The neighbor holds better time; initiate toward it.
                let request =
                    TimeSyncPackage::request(self.node_id(), pkg.from, self.node_time());
                if let Ok(text) = Variant::TimeSync(request).encode() {
                    self.enqueue_on(from_conn, &text, PRIORITY_HIGH);
                }
            }
            TIME_STAGE_REQUEST => {
                let Some(t0) = pkg.msg.t0 else {
                    log::warn!("mesh({}): time-sync request without t0", self.node_id());
                    return;
                };
                let t1 = self.node_time();
                let t2 = self.node_time();
                let reply = TimeSyncPackage::reply(self.node_id(), pkg.from, t0, t1, t2);
                if let Ok(text) = Variant::TimeSync(reply).encode() {
                    self.enqueue_on(from_conn, &text, PRIORITY_HIGH);
                }
            }
            TIME_STAGE_REPLY => {
                let t3 = self.node_time();
                let (Some(t0), Some(t1), Some(t2)) = (pkg.msg.t0, pkg.msg.t1, pkg.msg.t2) else {
                    log::warn!("mesh({}): incomplete time-sync reply", self.node_id());
                    return;
                };
                let offset = (us_diff(t1, t0) as i64 + us_diff(t2, t3) as i64) / 2;
                let trip = us_diff(t3, t0) as i64 - us_diff(t2, t1) as i64;
                log::debug!(
                    "mesh({}): time-sync with {}: offset {offset} us, trip {trip} us",
                    self.node_id(),
                    pkg.from
                );
                if trip >= 0 {
                    if let Some(conn) = self.connection_mut(from_conn) {
                        conn.record_latency((trip / 2 / 1000) as u32);
                    }
                }
                self.adjust_time(offset as i32);
                if offset.abs() > RESYNC_THRESHOLD_US {
                    // Our clock moved; re-measure this link and renegotiate
                    // with every other neighbor so the change ripples out.
                    let now = self.now_ms();
                    let tasks: Vec<_> = self
                        .iter_live()
                        .filter_map(|conn| conn.time_sync_task)
                        .collect();
                    for task in tasks {
                        self.scheduler.restart_delayed(task, now + RESYNC_DELAY_MS);
                    }
                }
            }
            stage => {
                log::warn!("mesh({}): unknown time-sync stage {stage}", self.node_id());
            }
        }
    }

    pub(crate) fn handle_time_delay(&mut self, from_conn: ConnectionId, pkg: TimeDelayPackage) {
        match pkg.msg.stage {
            TIME_STAGE_REQUEST => {
                let Some(t0) = pkg.msg.t0 else { return };
                let t1 = self.node_time();
                let t2 = self.node_time();
                let reply = TimeDelayPackage::reply(self.node_id(), pkg.from, t0, t1, t2);
                // Delay replies route back over the tree, not only one hop.
                self.send_variant(&Variant::TimeDelay(reply), PRIORITY_HIGH);
            }
            TIME_STAGE_REPLY => {
                let t3 = self.node_time();
                let (Some(t0), Some(t1), Some(t2)) = (pkg.msg.t0, pkg.msg.t1, pkg.msg.t2) else {
                    return;
                };
                let delay = (us_diff(t3, t0) as i64 - us_diff(t2, t1) as i64) / 2;
                if let Some(conn) = self.connection_mut(from_conn) {
                    // End-to-end delay only doubles as link latency when the
                    // origin is the direct neighbor.
                    if delay >= 0 && conn.neighbor_id == pkg.from {
                        conn.record_latency((delay / 1000) as u32);
                    }
                }
                self.fire_node_delay_received(pkg.from, delay as i32);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(node_id: u32, authority: bool, subs: usize) -> NodeTree {
        NodeTree {
            node_id,
            root: false,
            has_time_authority: authority,
            subs: (0..subs).map(|index| NodeTree::new(100 + index as u32)).collect(),
        }
    }

    #[test]
    fn authority_always_wins() {
        assert!(adopt(&tree(1, false, 5), &tree(2, true, 0)));
        assert!(!adopt(&tree(1, true, 0), &tree(2, false, 5)));
    }

    #[test]
    fn larger_half_wins_without_authority() {
        assert!(adopt(&tree(1, false, 1), &tree(2, false, 3)));
        assert!(!adopt(&tree(1, false, 3), &tree(2, false, 1)));
    }

    #[test]
    fn equal_halves_fall_back_to_smaller_id() {
        assert!(adopt(&tree(5, false, 2), &tree(3, false, 2)));
        assert!(!adopt(&tree(3, false, 2), &tree(5, false, 2)));
    }

    #[test]
    fn authority_tie_uses_size_then_id() {
        assert!(adopt(&tree(5, true, 1), &tree(3, true, 3)));
        assert!(adopt(&tree(5, true, 2), &tree(3, true, 2)));
        assert!(!adopt(&tree(2, true, 2), &tree(3, true, 2)));
    }
}
