//! Priority-ordered store for Internet-bound messages produced while no
//! healthy gateway exists.
//!
//! Admission on a full queue favors the important: CRITICAL/HIGH may evict
//! the oldest LOW (or a NORMAL older than an hour); NORMAL/LOW are rejected.
//! Optional persistence is one JSON object per line, written on CRITICAL
//! admission and on every flush.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::buffer::{PRIORITY_HIGH, PRIORITY_LOW, PRIORITY_NORMAL};

const NORMAL_EVICTION_AGE_MS: u64 = 3_600_000;

/// Fill levels reported through the edge-triggered state callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueueState {
    #[default]
    Empty,
    Quarter,
    Half,
    ThreeQuarter,
    Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total_queued: u32,
    pub total_sent: u32,
    pub total_dropped: u32,
    pub total_failed: u32,
    pub current_size: u32,
    pub peak_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: u32,
    pub priority: u8,
    pub timestamp: u64,
    pub attempts: u32,
    pub payload: String,
    pub destination: String,
}

pub type QueueStateCallback = Box<dyn FnMut(QueueState, u32)>;

pub struct MessageQueue {
    entries: Vec<QueuedMessage>,
    max_size: usize,
    next_id: u32,
    max_retry_attempts: u32,
    storage: Option<PathBuf>,
    stats: QueueStats,
    last_notified: QueueState,
    state_callback: Option<QueueStateCallback>,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(500, None)
    }
}

impl MessageQueue {
    pub fn new(max_size: usize, storage: Option<PathBuf>) -> Self {
        let mut queue = Self {
            entries: Vec::new(),
            max_size,
            next_id: 1,
            max_retry_attempts: 3,
            storage,
            stats: QueueStats::default(),
            last_notified: QueueState::Empty,
            state_callback: None,
        };
        if queue.storage.is_some() {
            let loaded = queue.load_from_storage();
            if loaded > 0 {
                log::info!("queue: loaded {loaded} persisted messages");
            }
        }
        queue
    }

    pub fn on_state_changed(&mut self, callback: QueueStateCallback) {
        self.state_callback = Some(callback);
    }

    pub fn set_max_retry_attempts(&mut self, attempts: u32) {
        self.max_retry_attempts = attempts;
    }

    pub fn max_retry_attempts(&self) -> u32 {
        self.max_retry_attempts
    }

    /// Admit a message; returns its id, or 0 when the queue rejected it.
    pub fn queue_message(
        &mut self,
        payload: &str,
        destination: &str,
        priority: u8,
        now_ms: u64,
    ) -> u32 {
        let priority = priority.min(PRIORITY_LOW);
        if self.is_full() {
            let may_evict = priority <= PRIORITY_HIGH;
            if !may_evict || !self.make_space(now_ms) {
                log::error!("queue: full, dropping message (priority {priority})");
                self.stats.total_dropped += 1;
                return 0;
            }
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.entries.push(QueuedMessage {
            id,
            priority,
            timestamp: now_ms,
            attempts: 0,
            payload: payload.to_string(),
            destination: destination.to_string(),
        });
        self.stats.total_queued += 1;
        self.stats.current_size = self.entries.len() as u32;
        self.stats.peak_size = self.stats.peak_size.max(self.stats.current_size);
        log::debug!(
            "queue: admitted #{id} (priority {priority}, {}/{})",
            self.entries.len(),
            self.max_size
        );
        self.notify_state_change();

        if priority == crate::buffer::PRIORITY_CRITICAL {
            self.save_to_storage();
        }
        id
    }

    /// Try to send everything; entries past the retry cap are dropped as
    /// failed. Returns the number sent.
    pub fn flush<F>(&mut self, mut send: F) -> u32
    where
        F: FnMut(&str, &str) -> bool,
    {
        let max_attempts = self.max_retry_attempts;
        let mut sent_count = 0;
        let stats = &mut self.stats;
        self.entries.retain_mut(|entry| {
            entry.attempts += 1;
            if send(&entry.payload, &entry.destination) {
                stats.total_sent += 1;
                sent_count += 1;
                false
            } else if entry.attempts >= max_attempts {
                log::error!("queue: message #{} exceeded retry limit, dropping", entry.id);
                stats.total_failed += 1;
                false
            } else {
                true
            }
        });
        self.stats.current_size = self.entries.len() as u32;
        log::debug!("queue: flushed {sent_count}, {} remaining", self.entries.len());
        self.notify_state_change();
        self.save_to_storage();
        sent_count
    }

    /// Drop entries older than `max_age_hours`; returns how many.
    pub fn prune(&mut self, max_age_hours: u64, now_ms: u64) -> u32 {
        let max_age_ms = max_age_hours * 3_600_000;
        let before = self.entries.len();
        self.entries.retain(|entry| now_ms.wrapping_sub(entry.timestamp) <= max_age_ms);
        let removed = (before - self.entries.len()) as u32;
        if removed > 0 {
            self.stats.current_size = self.entries.len() as u32;
            log::info!("queue: pruned {removed} stale messages");
            self.notify_state_change();
            self.save_to_storage();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats.current_size = 0;
        self.notify_state_change();
        self.save_to_storage();
    }

    pub fn count(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn count_by_priority(&self, priority: u8) -> u32 {
        self.entries.iter().filter(|entry| entry.priority == priority).count() as u32
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_size
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    pub fn save_to_storage(&self) -> bool {
        let Some(path) = &self.storage else { return false };
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::File::create(path)?;
            for entry in &self.entries {
                let line = serde_json::to_string(entry)
                    .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
                writeln!(file, "{line}")?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => true,
            Err(err) => {
                log::error!("queue: failed to persist to {}: {err}", path.display());
                false
            }
        }
    }

    pub fn load_from_storage(&mut self) -> u32 {
        let Some(path) = &self.storage else { return 0 };
        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(_) => return 0,
        };
        let mut loaded = 0;
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<QueuedMessage>(&line) {
                Ok(entry) => {
                    if entry.id >= self.next_id {
                        self.next_id = entry.id + 1;
                    }
                    self.entries.push(entry);
                    loaded += 1;
                }
                Err(err) => log::warn!("queue: skipping corrupt persisted line: {err}"),
            }
        }
        self.stats.current_size = self.entries.len() as u32;
        loaded
    }

    /// Evict to make room for an important message: oldest LOW first, then a
    /// NORMAL older than an hour.
    fn make_space(&mut self, now_ms: u64) -> bool {
        if let Some(index) = self.entries.iter().position(|entry| entry.priority == PRIORITY_LOW) {
            log::debug!("queue: evicting LOW message #{}", self.entries[index].id);
            self.entries.remove(index);
            self.stats.total_dropped += 1;
            self.stats.current_size = self.entries.len() as u32;
            return true;
        }
        if let Some(index) = self.entries.iter().position(|entry| {
            entry.priority == PRIORITY_NORMAL
                && now_ms.wrapping_sub(entry.timestamp) > NORMAL_EVICTION_AGE_MS
        }) {
            log::debug!("queue: evicting aged NORMAL message #{}", self.entries[index].id);
            self.entries.remove(index);
            self.stats.total_dropped += 1;
            self.stats.current_size = self.entries.len() as u32;
            return true;
        }
        log::error!("queue: cannot free space, only fresh NORMAL/HIGH/CRITICAL entries");
        false
    }

    fn fill_state(&self) -> QueueState {
        if self.entries.is_empty() {
            return QueueState::Empty;
        }
        let fill = self.entries.len() as f32 / self.max_size as f32;
        if fill >= 1.0 {
            QueueState::Full
        } else if fill >= 0.75 {
            QueueState::ThreeQuarter
        } else if fill >= 0.5 {
            QueueState::Half
        } else if fill >= 0.25 {
            QueueState::Quarter
        } else {
            QueueState::Empty
        }
    }

    fn notify_state_change(&mut self) {
        let state = self.fill_state();
        if state != self.last_notified {
            self.last_notified = state;
            let count = self.entries.len() as u32;
            if let Some(callback) = self.state_callback.as_mut() {
                callback(state, count);
            }
        }
    }
}
