//! weft-mesh: a self-forming, self-healing peer mesh protocol runtime.
//!
//! Every node is simultaneously access point and station; neighbors exchange
//! subtree advertisements until the whole topology converges to one spanning
//! tree, over which unicasts are routed hop by hop and broadcasts flood.
//! Nodes agree on a shared time base through authority-aware NTP-style
//! exchanges, and any node with router credentials can be elected to relay
//! Internet requests for the rest of the mesh.
//!
//! The runtime is transport-agnostic and single-threaded: the host attaches
//! [`transport::Transport`] channels, feeds inbound bytes through
//! [`session::Mesh::feed`] and drives everything from one cooperative loop
//! via [`session::Mesh::update`]. `weft-net` provides the TCP glue.

pub mod buffer;
pub mod clock;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod gateway;
pub mod queue;
pub mod rtc;
pub mod session;
pub mod sim;
pub mod transport;

mod scheduler;

pub use clock::{Clock, SimClock, SystemClock};
pub use config::MeshConfig;
pub use connection::ConnectionId;
pub use error::MeshError;
pub use session::Mesh;
pub use transport::Transport;

pub use weft_proto as proto;
