//! Wire model for the weft mesh protocol.
//!
//! Every message on a mesh link is one NUL-terminated UTF-8 JSON object
//! carrying at least `type`, `from`, `dest` and `routing`. This crate owns
//! the catalog of package kinds, the recursive [`NodeTree`] layout view and
//! the tagged [`Variant`] envelope used to decode and encode them. Framing
//! and transport live elsewhere.

pub mod tree;
pub mod variant;

pub use tree::NodeTree;
pub use variant::{Routing, Variant};

/// Errors from wire decode/encode operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message is not a json object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown reserved package type: {0}")]
    UnknownType(u16),
}

/// Canonical wire-stable package type ids.
///
/// `0..=15` is reserved for internal kinds (the unused slots cover OTA and
/// drop-connection ids kept for compatibility), `610..=622` for the
/// bridge/gateway subsystem, and `16..` (outside the gateway range) for
/// user plugin packages.
pub mod type_id {
    pub const NODE_SYNC_REQUEST: u16 = 3;
    pub const NODE_SYNC_REPLY: u16 = 4;
    pub const TIME_SYNC: u16 = 5;
    pub const TIME_DELAY: u16 = 6;
    pub const SINGLE: u16 = 7;
    pub const BROADCAST: u16 = 8;

    pub const BRIDGE_STATUS: u16 = 610;
    pub const BRIDGE_ELECTION: u16 = 611;
    pub const BRIDGE_TAKEOVER: u16 = 612;
    pub const BRIDGE_COORDINATION: u16 = 613;
    pub const GATEWAY_DATA: u16 = 620;
    pub const GATEWAY_ACK: u16 = 621;
    pub const GATEWAY_HEARTBEAT: u16 = 622;

    /// First type id available to plugin packages.
    pub const PLUGIN_BASE: u16 = 16;

    pub fn is_reserved(id: u16) -> bool {
        id < PLUGIN_BASE
    }

    pub fn is_gateway(id: u16) -> bool {
        (610..=622).contains(&id)
    }
}
