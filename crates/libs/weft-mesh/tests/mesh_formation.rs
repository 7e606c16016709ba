//! Whole-mesh behavior over simulated links: tree formation, routing,
//! broadcast flooding and self-healing.

use std::cell::RefCell;
use std::rc::Rc;

use weft_mesh::sim::SimNet;

type Received = Rc<RefCell<Vec<(u32, String)>>>;

fn record_receives(net: &mut SimNet, index: usize) -> Received {
    let received: Received = Rc::new(RefCell::new(Vec::new()));
    let sink = received.clone();
    net.node_mut(index).on_receive(Box::new(move |_mesh, from, msg| {
        sink.borrow_mut().push((from, msg.to_string()));
    }));
    received
}

#[test]
fn two_nodes_converge_and_promote() {
    let mut net = SimNet::new(&[1001, 2002]);
    net.connect(0, 1);
    net.run(2_000, 10);

    assert_eq!(net.node(0).node_list(false), vec![2002]);
    assert_eq!(net.node(1).node_list(false), vec![1001]);
    assert!(net.node(0).is_connected(2002));
    assert!(net.node(0).has_active_mesh_connections());
}

#[test]
fn line_of_four_converges_to_full_view() {
    let mut net = SimNet::new(&[1, 2, 3, 4]);
    net.connect(0, 1);
    net.connect(1, 2);
    net.connect(2, 3);
    net.run(5_000, 10);

    for index in 0..4 {
        let mut list = net.node(index).node_list(true);
        list.sort_unstable();
        assert_eq!(list, vec![1, 2, 3, 4], "node {index} sees the whole mesh");
    }
    // Ends of the line are three hops apart.
    assert_eq!(net.node(0).hop_count(4), 3);
    assert_eq!(net.node(0).hop_count(2), 1);
}

#[test]
fn no_node_appears_in_its_own_tree() {
    let mut net = SimNet::new(&[10, 20, 30, 40, 50]);
    net.connect(0, 1);
    net.connect(2, 1);
    net.connect(3, 2);
    net.connect(4, 2);
    net.run(5_000, 10);

    for index in 0..5 {
        let mesh = net.node(index);
        let tree = mesh.as_node_tree();
        let others = tree.flatten(false);
        assert!(
            !others.contains(&mesh.node_id()),
            "node {} lists itself in its own subtrees",
            mesh.node_id()
        );
        // And every advertised id is unique.
        let mut ids = tree.flatten(true);
        ids.sort_unstable();
        let len_before = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), len_before, "duplicate ids in node {index}'s tree");
    }
}

#[test]
fn ring_converges_by_dropping_the_looping_edge() {
    let mut net = SimNet::new(&[1, 2, 3]);
    net.connect(0, 1);
    net.connect(1, 2);
    net.run(3_000, 10);
    // Closing the ring creates a loop; node-sync must reject it.
    net.connect(2, 0);
    net.run(5_000, 10);

    for index in 0..3 {
        let mut list = net.node(index).node_list(true);
        list.sort_unstable();
        assert_eq!(list, vec![1, 2, 3], "node {index} after ring closure");
    }
}

#[test]
fn broadcast_reaches_every_node_exactly_once() {
    let mut net = SimNet::new(&[1, 2, 3]);
    net.connect(0, 1);
    net.connect(1, 2);
    net.run(3_000, 10);

    let received_1 = record_receives(&mut net, 1);
    let received_2 = record_receives(&mut net, 2);
    let received_0 = record_receives(&mut net, 0);

    assert!(net.node_mut(0).send_broadcast("hello from 0", false));
    net.run(1_000, 10);

    assert_eq!(*received_1.borrow(), vec![(1, "hello from 0".to_string())]);
    assert_eq!(*received_2.borrow(), vec![(1, "hello from 0".to_string())]);
    assert!(received_0.borrow().is_empty(), "sender must not hear its own broadcast");
}

#[test]
fn broadcast_include_self_fires_locally() {
    let mut net = SimNet::new(&[1, 2]);
    net.connect(0, 1);
    net.run(2_000, 10);

    let received_0 = record_receives(&mut net, 0);
    assert!(net.node_mut(0).send_broadcast("note to everyone", true));
    net.run(500, 10);
    assert_eq!(*received_0.borrow(), vec![(1, "note to everyone".to_string())]);
}

#[test]
fn send_single_reaches_only_the_target() {
    let mut net = SimNet::new(&[1, 2, 3]);
    net.connect(0, 1);
    net.connect(1, 2);
    net.run(3_000, 10);

    let received_1 = record_receives(&mut net, 1);
    let received_2 = record_receives(&mut net, 2);

    assert!(net.node_mut(0).send_single(3, "just for you"));
    net.run(1_000, 10);

    assert!(received_1.borrow().is_empty(), "relay node must not surface the message");
    assert_eq!(*received_2.borrow(), vec![(1, "just for you".to_string())]);
}

#[test]
fn multi_hop_delivery_over_a_line() {
    let mut net = SimNet::new(&[1, 2, 3, 4]);
    net.connect(0, 1);
    net.connect(1, 2);
    net.connect(2, 3);
    net.run(5_000, 10);

    let received_3 = record_receives(&mut net, 3);
    assert!(net.node_mut(0).send_single(4, "via hops"));
    net.run(1_000, 10);
    assert_eq!(*received_3.borrow(), vec![(1, "via hops".to_string())]);
}

#[test]
fn echo_roundtrip_through_a_receive_callback() {
    let mut net = SimNet::new(&[1, 2]);
    net.connect(0, 1);
    net.run(2_000, 10);

    net.node_mut(0).on_receive(Box::new(|mesh, from, msg| {
        let msg = msg.to_string();
        mesh.send_single(from, &msg);
    }));
    let received_1 = record_receives(&mut net, 1);

    assert!(!net.node_mut(1).send_single(2, "to-self"), "sending to self is refused");
    assert!(net.node_mut(1).send_single(1, "ping"));
    net.run(500, 10);

    assert_eq!(*received_1.borrow(), vec![(1, "ping".to_string())]);
}

#[test]
fn send_single_without_route_fails_quietly() {
    let mut net = SimNet::new(&[1, 2]);
    net.connect(0, 1);
    net.run(2_000, 10);
    assert!(!net.node_mut(0).send_single(99, "nobody home"));
}

#[test]
fn dropped_link_fires_callbacks_and_heals_the_view() {
    let mut net = SimNet::new(&[1, 2, 3]);
    net.connect(0, 1);
    let (conn_1_to_2, _) = net.connect(1, 2);
    net.run(3_000, 10);

    let dropped: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = dropped.clone();
    net.node_mut(1).on_dropped_connection(Box::new(move |_mesh, node_id| {
        sink.borrow_mut().push(node_id);
    }));

    net.node_mut(1).drop_connection(conn_1_to_2);
    net.run(2_000, 10);

    assert_eq!(*dropped.borrow(), vec![3]);
    let mut list = net.node(0).node_list(true);
    list.sort_unstable();
    assert_eq!(list, vec![1, 2], "node 3 must vanish from the far side's view");
    assert!(!net.node(0).is_connected(3));
}

#[test]
fn routing_table_and_json_views_cover_the_mesh() {
    let mut net = SimNet::new(&[1, 2, 3]);
    net.connect(0, 1);
    net.connect(1, 2);
    net.run(3_000, 10);

    let table = net.node(0).routing_table();
    assert_eq!(table.get(&2), Some(&2));
    assert_eq!(table.get(&3), Some(&2), "far node routes through the neighbor");

    let json = net.node(0).sub_connection_json();
    let value: serde_json::Value = serde_json::from_str(&json).expect("layout json");
    assert_eq!(value["nodeId"], 1);
    assert_eq!(value["subs"][0]["nodeId"], 2);

    let details = net.node(0).connection_details();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].node_id, 2);
    assert!(details[0].messages_rx > 0);
}
