//! Cooperative task table driven from `Mesh::update`.
//!
//! Tasks are named by a [`TaskKind`] tag instead of stored closures: a fired
//! task that references a freed connection slot simply no-ops, which removes
//! any need for deferred cleanup of owners that died first.

use crate::connection::ConnectionId;

/// Handle to a scheduled task. Stale handles (the slot was reused) are
/// ignored by every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    slot: u32,
    generation: u32,
}

/// Every periodic or one-shot job the runtime runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    /// Request/reply subtree exchange with one neighbor.
    NodeSync(ConnectionId),
    /// NTP-style offset exchange with one neighbor.
    TimeSync(ConnectionId),
    /// One-shot idle timeout; firing closes the connection.
    ConnectionTimeout(ConnectionId),
    /// Periodic BRIDGE_STATUS broadcast (bridge role only).
    BridgeStatusBroadcast,
    /// Periodic GATEWAY_HEARTBEAT broadcast (bridge role only).
    GatewayHeartbeat,
    /// Watches the primary bridge's heartbeat freshness.
    HeartbeatWatch,
    /// Periodic Internet reachability probe (bridge role only).
    InternetCheck,
    /// Deferred election kick-off after a failure was detected.
    ElectionStart,
    /// Closes the candidate collection window and picks a winner.
    ElectionEvaluate,
    /// Client-side timeout for one pending Internet request.
    RequestTimeout(u32),
    /// Client-side backoff retry for one pending Internet request.
    RequestRetry(u32),
    /// Deferred unicast BRIDGE_STATUS to a freshly promoted neighbor.
    GreetNeighbor(ConnectionId),
}

#[derive(Debug)]
struct Task {
    kind: TaskKind,
    next_at_ms: u64,
    interval_ms: u64,
    /// `None` repeats forever; `Some(n)` fires n more times.
    remaining: Option<u32>,
    enabled: bool,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    task: Option<Task>,
}

/// Single-owner table of all scheduled work.
#[derive(Default)]
pub(crate) struct Scheduler {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a one-shot task at the absolute time `at_ms`.
    pub fn once(&mut self, kind: TaskKind, at_ms: u64) -> TaskId {
        self.insert(Task { kind, next_at_ms: at_ms, interval_ms: 0, remaining: Some(1), enabled: true })
    }

    /// Schedule a repeating task, first firing at `first_at_ms`.
    pub fn every(&mut self, kind: TaskKind, first_at_ms: u64, interval_ms: u64) -> TaskId {
        self.insert(Task {
            kind,
            next_at_ms: first_at_ms,
            interval_ms,
            remaining: None,
            enabled: true,
        })
    }

    pub fn cancel(&mut self, id: TaskId) {
        if let Some(slot) = self.live_slot(id) {
            self.slots[slot as usize].task = None;
            self.slots[slot as usize].generation += 1;
            self.free.push(slot);
        }
    }

    /// Re-arm a (possibly suspended) task to fire once more at `at_ms`.
    pub fn restart_delayed(&mut self, id: TaskId, at_ms: u64) {
        if let Some(slot) = self.live_slot(id) {
            if let Some(task) = self.slots[slot as usize].task.as_mut() {
                task.next_at_ms = at_ms;
                task.enabled = true;
                if task.remaining == Some(0) {
                    task.remaining = Some(1);
                }
            }
        }
    }

    /// Park a task without freeing its slot; `restart_delayed` re-arms it.
    pub fn suspend(&mut self, id: TaskId) {
        if let Some(slot) = self.live_slot(id) {
            if let Some(task) = self.slots[slot as usize].task.as_mut() {
                task.enabled = false;
            }
        }
    }

    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.slots
            .get(id.slot as usize)
            .is_some_and(|slot| slot.generation == id.generation && slot.task.is_some())
    }

    /// Collect every task due at `now_ms`, advancing or retiring each.
    pub fn take_due(&mut self, now_ms: u64) -> Vec<(TaskId, TaskKind)> {
        let mut due = Vec::new();
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            let Some(task) = slot.task.as_mut() else { continue };
            if !task.enabled || task.next_at_ms > now_ms {
                continue;
            }
            due.push((TaskId { slot: index as u32, generation: slot.generation }, task.kind));
            match task.remaining {
                Some(count) if count <= 1 => {
                    slot.task = None;
                    slot.generation += 1;
                    self.free.push(index as u32);
                }
                Some(count) => {
                    task.remaining = Some(count - 1);
                    task.next_at_ms = now_ms + task.interval_ms;
                }
                None => {
                    task.next_at_ms = now_ms + task.interval_ms.max(1);
                }
            }
        }
        due
    }

    fn insert(&mut self, task: Task) -> TaskId {
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.task = Some(task);
            TaskId { slot, generation: entry.generation }
        } else {
            self.slots.push(Slot { generation: 0, task: Some(task) });
            TaskId { slot: self.slots.len() as u32 - 1, generation: 0 }
        }
    }

    fn live_slot(&self, id: TaskId) -> Option<u32> {
        let slot = self.slots.get(id.slot as usize)?;
        (slot.generation == id.generation && slot.task.is_some()).then_some(id.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once_and_frees_the_slot() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.once(TaskKind::ElectionEvaluate, 100);
        assert!(scheduler.take_due(50).is_empty());
        let due = scheduler.take_due(100);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].1, TaskKind::ElectionEvaluate);
        assert!(scheduler.take_due(200).is_empty());
        assert!(!scheduler.is_scheduled(id));
    }

    #[test]
    fn repeating_task_advances_by_interval() {
        let mut scheduler = Scheduler::new();
        scheduler.every(TaskKind::HeartbeatWatch, 0, 1000);
        assert_eq!(scheduler.take_due(0).len(), 1);
        assert!(scheduler.take_due(500).is_empty());
        assert_eq!(scheduler.take_due(1000).len(), 1);
        assert_eq!(scheduler.take_due(2500).len(), 1);
    }

    #[test]
    fn stale_handle_is_ignored_after_slot_reuse() {
        let mut scheduler = Scheduler::new();
        let first = scheduler.once(TaskKind::ElectionEvaluate, 10);
        scheduler.cancel(first);
        let second = scheduler.once(TaskKind::HeartbeatWatch, 10);
        // Old handle must not touch the reused slot.
        scheduler.cancel(first);
        assert!(scheduler.is_scheduled(second));
        assert_eq!(scheduler.take_due(10).len(), 1);
    }

    #[test]
    fn suspend_parks_until_restarted() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.once(TaskKind::ElectionEvaluate, 100);
        scheduler.suspend(id);
        assert!(scheduler.take_due(150).is_empty());
        scheduler.restart_delayed(id, 200);
        assert_eq!(scheduler.take_due(200).len(), 1);
    }

    #[test]
    fn restart_delayed_rearms_a_timeout() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.once(TaskKind::HeartbeatWatch, 100);
        scheduler.restart_delayed(id, 500);
        assert!(scheduler.take_due(100).is_empty());
        assert_eq!(scheduler.take_due(500).len(), 1);
    }
}
