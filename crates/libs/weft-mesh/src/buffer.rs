//! Per-connection framed buffers.
//!
//! The wire is a concatenation of NUL-terminated UTF-8 JSON strings.
//! [`ReceiveBuffer`] reassembles whole messages from arbitrary byte chunks;
//! [`SendBuffer`] queues outbound messages with 4-level priority and
//! partial-write continuation so a message is never interleaved with another
//! on the wire.

use std::collections::VecDeque;

pub const PRIORITY_CRITICAL: u8 = 0;
pub const PRIORITY_HIGH: u8 = 1;
pub const PRIORITY_NORMAL: u8 = 2;
pub const PRIORITY_LOW: u8 = 3;

/// Reassembles NUL-delimited messages from the byte stream.
#[derive(Default)]
pub struct ReceiveBuffer {
    partial: Vec<u8>,
    messages: VecDeque<String>,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of raw bytes; may complete zero or more messages.
    pub fn push(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if byte == 0 {
                self.finish_fragment();
            } else {
                self.partial.push(byte);
            }
        }
    }

    fn finish_fragment(&mut self) {
        if self.partial.is_empty() {
            return;
        }
        match String::from_utf8(std::mem::take(&mut self.partial)) {
            Ok(message) => self.messages.push_back(message),
            Err(err) => {
                log::warn!("rx buffer: dropping non-utf8 frame ({} bytes)", err.as_bytes().len());
            }
        }
    }

    pub fn front(&self) -> Option<&str> {
        self.messages.front().map(String::as_str)
    }

    pub fn pop_front(&mut self) -> Option<String> {
        self.messages.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.partial.clear();
        self.messages.clear();
    }
}

/// Per-priority queued/sent counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendStats {
    pub total_queued: u32,
    pub queued: [u32; 4],
    pub sent: [u32; 4],
}

struct Entry {
    /// Message bytes with the trailing NUL frame terminator.
    data: Vec<u8>,
    priority: u8,
    sent: usize,
}

impl Entry {
    fn remaining(&self) -> usize {
        self.data.len() - self.sent
    }
}

/// Priority-ordered outbound message store.
///
/// Selection is by lowest priority value, FIFO within a level, except that a
/// partially written entry keeps the wire until it drains.
#[derive(Default)]
pub struct SendBuffer {
    entries: Vec<Entry>,
    current: Option<usize>,
    clean: bool,
    last_read_len: usize,
    last_read_priority: u8,
    stats: SendStats,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self { clean: true, last_read_priority: PRIORITY_NORMAL, ..Self::default() }
    }

    /// Legacy two-level API: `high` maps to HIGH, otherwise NORMAL.
    pub fn push(&mut self, message: &str, high: bool) {
        let priority = if high { PRIORITY_HIGH } else { PRIORITY_NORMAL };
        self.push_with_priority(message, priority);
    }

    pub fn push_with_priority(&mut self, message: &str, priority: u8) {
        let priority = priority.min(PRIORITY_LOW);
        let mut data = Vec::with_capacity(message.len() + 1);
        data.extend_from_slice(message.as_bytes());
        data.push(0);
        self.entries.push(Entry { data, priority, sent: 0 });
        self.stats.total_queued += 1;
        self.stats.queued[priority as usize] += 1;
    }

    /// Length available from the currently selected entry, capped at `max`.
    pub fn request_length(&mut self, max: usize) -> usize {
        match self.select() {
            Some(index) => self.entries[index].remaining().min(max),
            None => 0,
        }
    }

    /// Borrow the next `len` unsent bytes of the selected entry.
    ///
    /// Call [`SendBuffer::free_read`] afterwards with the amount actually
    /// written to the transport.
    pub fn read_chunk(&mut self, len: usize) -> Option<&[u8]> {
        let index = self.select()?;
        let entry = &self.entries[index];
        let len = len.min(entry.remaining());
        self.last_read_len = len;
        self.last_read_priority = entry.priority;
        Some(&self.entries[index].data[self.entries[index].sent..][..len])
    }

    /// Consume what the last `read_chunk` handed out (or a written prefix of
    /// it), erasing the entry once fully sent.
    pub fn free_read(&mut self, written: usize) {
        let Some(index) = self.current.or_else(|| self.select()) else {
            self.last_read_len = 0;
            return;
        };
        let written = written.min(self.last_read_len);
        let entry = &mut self.entries[index];
        entry.sent += written;
        if entry.remaining() == 0 {
            self.stats.sent[entry.priority as usize] += 1;
            self.entries.remove(index);
            self.current = None;
            self.clean = true;
        } else {
            self.current = Some(index);
            if written > 0 {
                self.clean = false;
            }
        }
        self.last_read_len = 0;
    }

    /// Priority of the entry served by the last `read_chunk`, used by the
    /// transport layer to force a flush for CRITICAL/HIGH traffic.
    pub fn last_read_priority(&self) -> u8 {
        self.last_read_priority
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> SendStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = None;
        self.clean = true;
        self.last_read_len = 0;
        self.stats = SendStats::default();
    }

    /// Index of the entry that owns the wire: the in-progress entry while a
    /// partial write is outstanding, otherwise lowest priority value with
    /// ties broken by insertion order.
    fn select(&mut self) -> Option<usize> {
        if self.entries.is_empty() {
            self.current = None;
            return None;
        }
        if !self.clean {
            if let Some(index) = self.current {
                if index < self.entries.len() {
                    return Some(index);
                }
            }
        }
        let mut best = 0;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.priority < self.entries[best].priority {
                best = index;
            }
        }
        self.current = Some(best);
        Some(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_reassembles_across_chunks() {
        let mut buffer = ReceiveBuffer::new();
        buffer.push(b"{\"a\"");
        assert!(buffer.is_empty());
        buffer.push(b":1}\0{\"b\":2}\0{\"c\"");
        assert_eq!(buffer.pop_front().as_deref(), Some("{\"a\":1}"));
        assert_eq!(buffer.pop_front().as_deref(), Some("{\"b\":2}"));
        assert!(buffer.is_empty());
        buffer.push(b":3}\0");
        assert_eq!(buffer.front(), Some("{\"c\":3}"));
    }

    #[test]
    fn receive_skips_empty_frames() {
        let mut buffer = ReceiveBuffer::new();
        buffer.push(b"\0\0{\"a\":1}\0\0");
        assert_eq!(buffer.pop_front().as_deref(), Some("{\"a\":1}"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn receive_clear_drops_partial_fragment() {
        let mut buffer = ReceiveBuffer::new();
        buffer.push(b"{\"a\"");
        buffer.clear();
        buffer.push(b":1}\0");
        // The fragment head was discarded, so only the tail arrives.
        assert_eq!(buffer.pop_front().as_deref(), Some(":1}"));
    }

    fn drain_one(buffer: &mut SendBuffer, window: usize) -> Vec<u8> {
        let len = buffer.request_length(window);
        let chunk = buffer.read_chunk(len).map(<[u8]>::to_vec).unwrap_or_default();
        buffer.free_read(chunk.len());
        chunk
    }

    #[test]
    fn critical_overtakes_normal() {
        let mut buffer = SendBuffer::new();
        buffer.push_with_priority("normal", PRIORITY_NORMAL);
        buffer.push_with_priority("critical", PRIORITY_CRITICAL);
        let first = drain_one(&mut buffer, 1024);
        assert_eq!(first, b"critical\0");
        assert_eq!(buffer.last_read_priority(), PRIORITY_CRITICAL);
        let second = drain_one(&mut buffer, 1024);
        assert_eq!(second, b"normal\0");
    }

    #[test]
    fn fifo_within_a_priority_level() {
        let mut buffer = SendBuffer::new();
        buffer.push_with_priority("first", PRIORITY_NORMAL);
        buffer.push_with_priority("second", PRIORITY_NORMAL);
        buffer.push_with_priority("third", PRIORITY_NORMAL);
        assert_eq!(drain_one(&mut buffer, 1024), b"first\0");
        assert_eq!(drain_one(&mut buffer, 1024), b"second\0");
        assert_eq!(drain_one(&mut buffer, 1024), b"third\0");
    }

    #[test]
    fn partial_write_blocks_priority_inversion() {
        let mut buffer = SendBuffer::new();
        buffer.push_with_priority("longnormalmessage", PRIORITY_NORMAL);
        // Write only a prefix of the NORMAL entry.
        let len = buffer.request_length(4);
        assert_eq!(len, 4);
        let chunk = buffer.read_chunk(len).expect("chunk").to_vec();
        assert_eq!(chunk, b"long");
        buffer.free_read(4);

        // A CRITICAL arrival must not preempt the in-progress entry.
        buffer.push_with_priority("urgent", PRIORITY_CRITICAL);
        let rest = drain_one(&mut buffer, 1024);
        assert_eq!(rest, b"normalmessage\0");
        // Only then the CRITICAL entry gets the wire.
        assert_eq!(drain_one(&mut buffer, 1024), b"urgent\0");
    }

    #[test]
    fn legacy_bool_api_maps_to_high_and_normal() {
        let mut buffer = SendBuffer::new();
        buffer.push("low-ish", false);
        buffer.push("urgent", true);
        assert_eq!(drain_one(&mut buffer, 1024), b"urgent\0");
        assert_eq!(buffer.stats().queued[PRIORITY_HIGH as usize], 1);
        assert_eq!(buffer.stats().queued[PRIORITY_NORMAL as usize], 1);
    }

    #[test]
    fn priority_clamped_to_low() {
        let mut buffer = SendBuffer::new();
        buffer.push_with_priority("clamped", 9);
        assert_eq!(buffer.stats().queued[PRIORITY_LOW as usize], 1);
    }

    #[test]
    fn sent_counters_track_completed_entries() {
        let mut buffer = SendBuffer::new();
        buffer.push_with_priority("one", PRIORITY_HIGH);
        buffer.push_with_priority("two", PRIORITY_LOW);
        drain_one(&mut buffer, 1024);
        drain_one(&mut buffer, 1024);
        let stats = buffer.stats();
        assert_eq!(stats.sent[PRIORITY_HIGH as usize], 1);
        assert_eq!(stats.sent[PRIORITY_LOW as usize], 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn zero_write_keeps_the_entry() {
        let mut buffer = SendBuffer::new();
        buffer.push_with_priority("stuck", PRIORITY_NORMAL);
        let len = buffer.request_length(1024);
        let _ = buffer.read_chunk(len);
        buffer.free_read(0);
        assert_eq!(buffer.len(), 1);
        assert_eq!(drain_one(&mut buffer, 1024), b"stuck\0");
    }
}
