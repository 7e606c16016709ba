//! In-memory links and a multi-node harness for driving whole meshes in
//! tests without a real transport.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::clock::SimClock;
use crate::config::MeshConfig;
use crate::connection::ConnectionId;
use crate::session::Mesh;
use crate::transport::Transport;

pub const DEFAULT_WINDOW: usize = 8192;

type Pipe = Rc<RefCell<VecDeque<u8>>>;

/// One end of a paired in-memory byte link with a bounded write window.
pub struct LinkTransport {
    outbound: Pipe,
    inbound: Pipe,
    open: Rc<Cell<bool>>,
    window: usize,
}

/// Build both ends of a link sharing one open flag: closing either side
/// drops the link for both.
pub fn link_pair(window: usize) -> (LinkTransport, LinkTransport) {
    let a_to_b: Pipe = Rc::new(RefCell::new(VecDeque::new()));
    let b_to_a: Pipe = Rc::new(RefCell::new(VecDeque::new()));
    let open = Rc::new(Cell::new(true));
    (
        LinkTransport {
            outbound: a_to_b.clone(),
            inbound: b_to_a.clone(),
            open: open.clone(),
            window,
        },
        LinkTransport { outbound: b_to_a, inbound: a_to_b, open, window },
    )
}

impl LinkTransport {
    fn inbound_handle(&self) -> Pipe {
        self.inbound.clone()
    }

    fn open_handle(&self) -> Rc<Cell<bool>> {
        self.open.clone()
    }
}

impl Transport for LinkTransport {
    fn space(&self) -> usize {
        if !self.open.get() {
            return 0;
        }
        self.window.saturating_sub(self.outbound.borrow().len())
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let len = data.len().min(self.space());
        self.outbound.borrow_mut().extend(&data[..len]);
        len
    }

    fn close(&mut self) {
        self.open.set(false);
    }

    fn is_open(&self) -> bool {
        self.open.get()
    }
}

struct Endpoint {
    node: usize,
    conn: ConnectionId,
    inbound: Pipe,
    open: Rc<Cell<bool>>,
}

/// Owns N nodes on one simulated clock and shuttles bytes between their
/// paired links every round.
pub struct SimNet {
    pub clock: SimClock,
    nodes: Vec<Mesh<LinkTransport>>,
    endpoints: Vec<Endpoint>,
}

impl SimNet {
    pub fn new(node_ids: &[u32]) -> Self {
        Self::with_config(node_ids, MeshConfig::default())
    }

    pub fn with_config(node_ids: &[u32], config: MeshConfig) -> Self {
        let clock = SimClock::new();
        let nodes = node_ids
            .iter()
            .map(|&id| Mesh::new(id, config.clone(), Box::new(clock.clone())))
            .collect();
        Self { clock, nodes, endpoints: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &Mesh<LinkTransport> {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut Mesh<LinkTransport> {
        &mut self.nodes[index]
    }

    /// Link two nodes; `station` initiates toward `ap`, mirroring who
    /// connected to whose access point.
    pub fn connect(&mut self, station: usize, ap: usize) -> (ConnectionId, ConnectionId) {
        self.connect_with_window(station, ap, DEFAULT_WINDOW)
    }

    pub fn connect_with_window(
        &mut self,
        station: usize,
        ap: usize,
        window: usize,
    ) -> (ConnectionId, ConnectionId) {
        let (station_end, ap_end) = link_pair(window);
        let station_endpoint = (station_end.inbound_handle(), station_end.open_handle());
        let ap_endpoint = (ap_end.inbound_handle(), ap_end.open_handle());

        let station_conn = self.nodes[station].add_connection(station_end, true);
        let ap_conn = self.nodes[ap].add_connection(ap_end, false);

        self.endpoints.push(Endpoint {
            node: station,
            conn: station_conn,
            inbound: station_endpoint.0,
            open: station_endpoint.1,
        });
        self.endpoints.push(Endpoint {
            node: ap,
            conn: ap_conn,
            inbound: ap_endpoint.0,
            open: ap_endpoint.1,
        });
        (station_conn, ap_conn)
    }

    /// Advance simulated time in fixed steps, moving bytes and updating
    /// every node each step.
    pub fn run(&mut self, total_ms: u64, step_ms: u64) {
        let steps = total_ms / step_ms.max(1);
        for _ in 0..steps {
            self.clock.advance_ms(step_ms.max(1));
            self.step();
        }
    }

    /// One round: deliver pending bytes, then update every node.
    pub fn step(&mut self) {
        self.pump();
        for node in self.nodes.iter_mut() {
            node.update();
        }
    }

    fn pump(&mut self) {
        for endpoint in &self.endpoints {
            if !endpoint.open.get() {
                self.nodes[endpoint.node].drop_connection(endpoint.conn);
                continue;
            }
            let bytes: Vec<u8> = endpoint.inbound.borrow_mut().drain(..).collect();
            if !bytes.is_empty() {
                let _ = self.nodes[endpoint.node].feed(endpoint.conn, &bytes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_pair_shuttles_bytes_both_ways() {
        let (mut a, mut b) = link_pair(64);
        assert_eq!(a.write(b"ping\0"), 5);
        let received: Vec<u8> = b.inbound.borrow_mut().drain(..).collect();
        assert_eq!(received, b"ping\0");
        assert_eq!(b.write(b"pong\0"), 5);
        let received: Vec<u8> = a.inbound.borrow_mut().drain(..).collect();
        assert_eq!(received, b"pong\0");
    }

    #[test]
    fn window_caps_writes() {
        let (mut a, _b) = link_pair(4);
        assert_eq!(a.write(b"123456"), 4);
        assert_eq!(a.space(), 0);
        assert_eq!(a.write(b"x"), 0);
    }

    #[test]
    fn closing_either_side_closes_both() {
        let (mut a, b) = link_pair(64);
        a.close();
        assert!(!b.is_open());
        assert_eq!(b.space(), 0);
    }
}
