//! Link-layer glue for the weft mesh runtime: a tokio TCP node driver, the
//! connect-retry policy, and the gateway-side Internet probe and HTTP
//! executor.
//!
//! The mesh runtime itself is synchronous and `!Send`; the driver owns it on
//! a local task, shuttling bytes between sockets and the session.

pub mod backoff;
pub mod http;
pub mod probe;
pub mod tcp;

use std::net::Ipv4Addr;

/// Default TCP port a mesh node listens on.
pub const MESH_PORT: u16 = 5555;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported url: {0}")]
    UnsupportedUrl(String),

    #[error("malformed http response")]
    MalformedResponse,
}

/// Stable node id derived from the interface MAC; 0 never comes out.
pub fn node_id_from_mac(mac: [u8; 6]) -> u32 {
    let id = u32::from_be_bytes([mac[2], mac[3], mac[4], mac[5]]);
    if id == 0 {
        1
    } else {
        id
    }
}

/// AP-side address for a node: `10.(id>>8 & 0xFF).(id & 0xFF).1`.
pub fn ap_ip(node_id: u32) -> Ipv4Addr {
    Ipv4Addr::new(10, (node_id >> 8) as u8, node_id as u8, 1)
}
