// Integration tests for payload delivery over a converged tree.

use canopy_core::config::ACKNOWLEDGEMENT_PORT;
use canopy_core::sim;
use std::sync::{Arc, Mutex};

type Deliveries = Arc<Mutex<Vec<Vec<u8>>>>;

fn capture_root(net: &mut sim::SimNetwork) -> Deliveries {
    let delivered: Deliveries = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    net.node_mut(1)
        .unwrap()
        .on_deliver(Box::new(move |payload| {
            sink.lock().unwrap().push(payload.to_vec());
        }));
    delivered
}

#[test]
fn test_payload_reaches_root_exactly_once_under_ack_loss() {
    let mut net = sim::chain(21, 4).unwrap();
    let delivered = capture_root(&mut net);
    net.run_for(12_000);

    // Lost acknowledgements force retries on every hop; the data frames
    // themselves get through, so dedup is what keeps delivery single.
    net.set_loss(ACKNOWLEDGEMENT_PORT, 0.3);
    net.send_from(5, b"hi").unwrap();
    net.run_for(15_000);

    let seen = delivered.lock().unwrap();
    assert_eq!(seen.as_slice(), &[b"hi".to_vec()]);
    drop(seen);

    // Each hop recorded the sequence number of the hop below it.
    assert!(net.node(4).unwrap().unicast().history().last_seq(5).is_some());
    assert!(net.node(3).unwrap().unicast().history().last_seq(4).is_some());
    assert!(net.node(2).unwrap().unicast().history().last_seq(3).is_some());
    assert!(net.node(1).unwrap().unicast().history().last_seq(2).is_some());
}

#[test]
fn test_send_wakes_a_sleeping_leaf() {
    let mut net = sim::chain(9, 1).unwrap();
    let delivered = capture_root(&mut net);
    net.run_for(12_000);

    // The lone member is a quiet leaf by now with its unicast ports closed.
    assert!(net.node(2).unwrap().is_leaf());
    assert!(!net.node(2).unwrap().unicast().is_online());

    net.send_from(2, b"ping").unwrap();
    net.run_for(3_000);

    assert_eq!(delivered.lock().unwrap().as_slice(), &[b"ping".to_vec()]);
    // Queue drained, sleep still granted: the radio is dark again.
    assert!(!net.node(2).unwrap().unicast().is_online());
}

#[test]
fn test_payloads_arrive_in_order() {
    let mut net = sim::chain(3, 2).unwrap();
    let delivered = capture_root(&mut net);
    net.run_for(10_000);

    for i in 0..5u8 {
        net.send_from(3, &[b'm', b'0' + i]).unwrap();
    }
    net.run_for(10_000);

    let seen = delivered.lock().unwrap();
    let expected: Vec<Vec<u8>> = (0..5u8).map(|i| vec![b'm', b'0' + i]).collect();
    assert_eq!(seen.as_slice(), expected.as_slice());
}

#[test]
fn test_parent_death_burns_the_retry_budget_then_reroutes() {
    // A diamond: the sender can reach the root through either relay.
    let mut net = sim::SimNetwork::new(13);
    net.add_node(canopy_core::NodeConfig::root(1)).unwrap();
    for id in 2..=4 {
        net.add_node(canopy_core::NodeConfig::member(id)).unwrap();
    }
    net.link(1, 2).unwrap();
    net.link(1, 3).unwrap();
    net.link(2, 3).unwrap();
    net.link(2, 4).unwrap();
    net.link(3, 4).unwrap();
    let delivered = capture_root(&mut net);
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    net.node_mut(4)
        .unwrap()
        .on_send_failure(Box::new(move |parent, tries| {
            sink.lock().unwrap().push((parent, tries));
        }));
    net.run_for(15_000);

    let first_parent = net.node(4).unwrap().record().parent;
    assert!(first_parent == 2 || first_parent == 3);

    // Kill the elected relay, then immediately queue a payload. Reliability
    // is per-hop only: the frame times out against the dead parent until the
    // retry budget is spent, and the failure hook reports the give-up.
    net.silence(first_parent);
    net.send_from(4, b"doomed").unwrap();
    net.run_for(30_000);

    assert!(delivered.lock().unwrap().is_empty());
    let seen = failures.lock().unwrap();
    assert_eq!(seen.last(), Some(&(first_parent, 6)));
    drop(seen);

    // The survivor relay took over once the dead one aged out.
    let other = if first_parent == 2 { 3 } else { 2 };
    assert_eq!(net.node(4).unwrap().record().parent, other);

    // Both survivors are napping leaves at first; wait until the relay has
    // heard its new child's record, promoted itself to backbone, and
    // reopened its unicast ports.
    for _ in 0..60 {
        let relay = net.node(other).unwrap();
        if !relay.is_leaf() && relay.unicast().is_online() {
            break;
        }
        net.run_for(1_000);
    }
    assert!(net.node(other).unwrap().unicast().is_online());

    net.send_from(4, b"detour").unwrap();
    net.run_for(10_000);
    assert_eq!(delivered.lock().unwrap().as_slice(), &[b"detour".to_vec()]);
}
