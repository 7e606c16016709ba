//! Seam between the runtime and whatever carries bytes to a neighbor.
//!
//! The runtime only ever writes; inbound bytes are handed to the session via
//! `Mesh::feed`. Real TCP glue and the in-memory test link both implement
//! this trait, which is the whole point of the seam.

pub trait Transport {
    /// Writable window in bytes; 0 means back off.
    fn space(&self) -> usize;

    /// Write a prefix of `data`, returning how much was accepted.
    fn write(&mut self, data: &[u8]) -> usize;

    /// Push buffered bytes out now (used after CRITICAL/HIGH writes).
    fn flush(&mut self) {}

    /// Tear the link down; after this `is_open` must report false.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}
