//! Mesh-wide time convergence over simulated links.

use weft_mesh::sim::SimNet;

/// Deterministic pseudo-random offsets; no external randomness in tests.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

fn pairwise_average_skew_us(net: &SimNet) -> f64 {
    let times: Vec<u32> = (0..net.len()).map(|index| net.node(index).node_time()).collect();
    let mut total = 0f64;
    let mut pairs = 0u32;
    for a in 0..times.len() {
        for b in (a + 1)..times.len() {
            let diff = (times[a].wrapping_sub(times[b]) as i32).unsigned_abs();
            total += diff as f64;
            pairs += 1;
        }
    }
    total / pairs as f64
}

#[test]
fn mesh_time_converges_from_random_offsets() {
    let ids: Vec<u32> = (1..=12).collect();
    let mut net = SimNet::new(&ids);
    // A branching tree rather than a pure line.
    net.connect(1, 0);
    net.connect(2, 0);
    net.connect(3, 1);
    net.connect(4, 1);
    net.connect(5, 2);
    net.connect(6, 2);
    net.connect(7, 3);
    net.connect(8, 4);
    net.connect(9, 5);
    net.connect(10, 6);
    net.connect(11, 7);

    let mut rng = Lcg(0x5eed);
    for index in 0..net.len() {
        let offset = (rng.next() % 1_000_000_000) as i64;
        net.node_mut(index).set_node_time_offset(offset);
    }

    let initial = pairwise_average_skew_us(&net);
    net.run(10_000, 10);
    let converged = pairwise_average_skew_us(&net);

    assert!(
        converged < initial,
        "average skew must shrink: {initial:.0} us -> {converged:.0} us"
    );
    assert!(
        converged < 20_000.0,
        "average pairwise skew after 10 s is {converged:.0} us, want < 20000"
    );
}

#[test]
fn large_adjustments_fire_the_time_callback() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut net = SimNet::new(&[1, 2]);
    net.connect(0, 1);

    net.node_mut(0).set_node_time_offset(500_000_000);
    let adjustments: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = adjustments.clone();
    let other = adjustments.clone();
    net.node_mut(0).on_node_time_adjusted(Box::new(move |_mesh, offset| {
        sink.borrow_mut().push(offset);
    }));
    net.node_mut(1).on_node_time_adjusted(Box::new(move |_mesh, offset| {
        other.borrow_mut().push(offset);
    }));

    net.run(5_000, 10);
    assert!(
        !adjustments.borrow().is_empty(),
        "a 500 ms skew must produce at least one adjustment callback"
    );
    let skew = pairwise_average_skew_us(&net);
    assert!(skew < 20_000.0, "two-node skew still {skew:.0} us");
}

#[test]
fn delay_measurement_reports_a_round_trip() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut net = SimNet::new(&[1, 2, 3]);
    net.connect(0, 1);
    net.connect(1, 2);
    net.run(3_000, 10);

    let delays: Rc<RefCell<Vec<(u32, i32)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = delays.clone();
    net.node_mut(0).on_node_delay_received(Box::new(move |_mesh, node_id, delay| {
        sink.borrow_mut().push((node_id, delay));
    }));

    assert!(net.node_mut(0).start_delay_measurement(3));
    assert!(!net.node_mut(0).start_delay_measurement(99));
    net.run(1_000, 10);

    let delays = delays.borrow();
    assert_eq!(delays.len(), 1);
    assert_eq!(delays[0].0, 3);
    assert!(delays[0].1 >= 0);
}
