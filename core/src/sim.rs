//! Deterministic in-process network simulator
//!
//! Hosts many logical nodes in one process on a virtual millisecond clock.
//! Links are symmetric, delivery adds a fixed latency, and each port can be
//! given an independent loss probability. All randomness comes from one
//! explicitly seeded generator, so a scenario replays identically for the
//! same seed.

use crate::node::{Node, NodeConfig};
use crate::radio::{LinkError, NodeId, Port, Radio, MAX_DATAGRAM};
use crate::tree::{EnergyClass, Variant};
use crate::Millis;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("node {0} already exists")]
    DuplicateNode(NodeId),
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
}

/// Where a captured frame was headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Broadcast,
    Unicast(NodeId),
}

/// A frame a [`SimRadio`] has transmitted but the network has not yet
/// picked up.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub port: Port,
    pub dest: Destination,
    pub payload: Vec<u8>,
}

/// Recording radio: transmissions pile up in `outgoing` until the network
/// drains them, and the open-port set gates what the owner can receive.
/// Also handy on its own as a test double for the protocol layers.
#[derive(Debug)]
pub struct SimRadio {
    id: NodeId,
    open_ports: HashSet<Port>,
    pub outgoing: Vec<Outgoing>,
}

impl SimRadio {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            open_ports: HashSet::new(),
            outgoing: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl Radio for SimRadio {
    fn broadcast(&mut self, port: Port, payload: &[u8]) -> Result<(), LinkError> {
        if payload.len() > MAX_DATAGRAM {
            return Err(LinkError::FrameTooLarge {
                size: payload.len(),
                max: MAX_DATAGRAM,
            });
        }
        self.outgoing.push(Outgoing {
            port,
            dest: Destination::Broadcast,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn unicast(&mut self, port: Port, dest: NodeId, payload: &[u8]) -> Result<(), LinkError> {
        if payload.len() > MAX_DATAGRAM {
            return Err(LinkError::FrameTooLarge {
                size: payload.len(),
                max: MAX_DATAGRAM,
            });
        }
        self.outgoing.push(Outgoing {
            port,
            dest: Destination::Unicast(dest),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn open(&mut self, port: Port) {
        self.open_ports.insert(port);
    }

    fn close(&mut self, port: Port) {
        self.open_ports.remove(&port);
    }

    fn is_open(&self, port: Port) -> bool {
        self.open_ports.contains(&port)
    }
}

/// A frame in the air.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Flight {
    deliver_at: Millis,
    /// Creation order; keeps the heap deterministic on simultaneous frames.
    seq: u64,
    to: NodeId,
    src: NodeId,
    port: Port,
    payload: Vec<u8>,
}

impl Ord for Flight {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deliver_at, self.seq).cmp(&(other.deliver_at, other.seq))
    }
}

impl PartialOrd for Flight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct SimNetwork {
    nodes: BTreeMap<NodeId, Node<SimRadio>>,
    links: BTreeSet<(NodeId, NodeId)>,
    silenced: BTreeSet<NodeId>,
    flights: BinaryHeap<Reverse<Flight>>,
    next_flight_seq: u64,
    now: Millis,
    latency_ms: u64,
    /// Independent loss probability per port; unlisted ports never lose.
    loss: HashMap<Port, f64>,
    rng: StdRng,
}

impl SimNetwork {
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: BTreeMap::new(),
            links: BTreeSet::new(),
            silenced: BTreeSet::new(),
            flights: BinaryHeap::new(),
            next_flight_seq: 0,
            now: 0,
            latency_ms: 2,
            loss: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn now(&self) -> Millis {
        self.now
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Add and start a node.
    pub fn add_node(&mut self, config: NodeConfig) -> Result<(), SimError> {
        let id = config.id;
        if self.nodes.contains_key(&id) {
            return Err(SimError::DuplicateNode(id));
        }
        let mut node = Node::new(config, SimRadio::new(id));
        node.start(self.now);
        self.nodes.insert(id, node);
        Ok(())
    }

    /// Put `a` and `b` in radio range of each other.
    pub fn link(&mut self, a: NodeId, b: NodeId) -> Result<(), SimError> {
        for id in [a, b] {
            if !self.nodes.contains_key(&id) {
                return Err(SimError::UnknownNode(id));
            }
        }
        self.links.insert((a.min(b), a.max(b)));
        Ok(())
    }

    /// Independent drop probability for every frame on `port`.
    pub fn set_loss(&mut self, port: Port, probability: f64) {
        self.loss.insert(port, probability.clamp(0.0, 1.0));
    }

    /// Kill a node: it stops being polled and hears and says nothing more.
    pub fn silence(&mut self, id: NodeId) {
        self.silenced.insert(id);
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<SimRadio>> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<SimRadio>> {
        self.nodes.get_mut(&id)
    }

    /// Enqueue an application payload at `id` for delivery to the root.
    pub fn send_from(&mut self, id: NodeId, payload: &[u8]) -> Result<(), SimError> {
        let now = self.now;
        let node = self.nodes.get_mut(&id).ok_or(SimError::UnknownNode(id))?;
        node.send(payload, now);
        Ok(())
    }

    fn linked(&self, a: NodeId, b: NodeId) -> bool {
        self.links.contains(&(a.min(b), a.max(b)))
    }

    fn neighbors_of(&self, id: NodeId) -> Vec<NodeId> {
        self.links
            .iter()
            .filter_map(|&(a, b)| {
                if a == id {
                    Some(b)
                } else if b == id {
                    Some(a)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Advance virtual time by `ms`, delivering frames and polling nodes as
    /// their moments come up.
    pub fn run_for(&mut self, ms: u64) {
        let horizon = self.now + ms;
        while self.now < horizon {
            self.step(horizon);
        }
    }

    fn step(&mut self, horizon: Millis) {
        let mut next = horizon;
        if let Some(Reverse(flight)) = self.flights.peek() {
            next = next.min(flight.deliver_at);
        }
        for (id, node) in self.nodes.iter() {
            if !self.silenced.contains(id) {
                next = next.min(node.next_wakeup());
            }
        }
        self.now = next.max(self.now);

        // Deliver everything due. The receiver must be alive, in range, and
        // listening on the port — a closed port models a powered-down radio.
        let mut due = Vec::new();
        while let Some(Reverse(flight)) = self.flights.peek() {
            if flight.deliver_at > self.now {
                break;
            }
            due.push(self.flights.pop().expect("peeked flight").0);
        }
        for flight in due {
            if self.silenced.contains(&flight.to) {
                continue;
            }
            let now = self.now;
            if let Some(node) = self.nodes.get_mut(&flight.to) {
                if node.radio().is_open(flight.port) {
                    node.handle_datagram(flight.port, flight.src, &flight.payload, now);
                } else {
                    debug!(to = flight.to, port = flight.port, "frame hit a closed port");
                }
            }
        }

        let now = self.now;
        let ids = self.ids();
        for id in ids {
            if self.silenced.contains(&id) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                if node.next_wakeup() <= now {
                    node.poll(now);
                }
            }
        }

        self.collect_outgoing();
    }

    /// Drain every radio and turn transmissions into in-flight frames,
    /// applying range and loss.
    fn collect_outgoing(&mut self) {
        let mut sent = Vec::new();
        for (&id, node) in self.nodes.iter_mut() {
            for frame in node.radio_mut().outgoing.drain(..) {
                sent.push((id, frame));
            }
        }
        for (src, frame) in sent {
            if self.silenced.contains(&src) {
                continue;
            }
            let targets: Vec<NodeId> = match frame.dest {
                Destination::Broadcast => self.neighbors_of(src),
                Destination::Unicast(dest) => {
                    if self.linked(src, dest) {
                        vec![dest]
                    } else {
                        debug!(src, dest, "unicast target out of range");
                        Vec::new()
                    }
                }
            };
            let loss = self.loss.get(&frame.port).copied().unwrap_or(0.0);
            for to in targets {
                if self.silenced.contains(&to) {
                    continue;
                }
                if loss > 0.0 && self.rng.gen_bool(loss) {
                    debug!(src, to, port = frame.port, "frame lost");
                    continue;
                }
                self.flights.push(Reverse(Flight {
                    deliver_at: self.now + self.latency_ms,
                    seq: self.next_flight_seq,
                    to,
                    src,
                    port: frame.port,
                    payload: frame.payload.clone(),
                }));
                self.next_flight_seq += 1;
            }
        }
    }
}

/// Root `1` and `hops` members in a line; only consecutive pairs hear each
/// other.
pub fn chain(seed: u64, hops: usize) -> Result<SimNetwork, SimError> {
    let mut net = SimNetwork::new(seed);
    net.add_node(NodeConfig::root(1))?;
    for i in 0..hops {
        let id = 2 + i as NodeId;
        net.add_node(NodeConfig::member(id))?;
        net.link(id - 1, id)?;
    }
    Ok(net)
}

/// Root `1` with `points` members, everyone in range of everyone.
pub fn star(seed: u64, points: usize) -> Result<SimNetwork, SimError> {
    let mut net = SimNetwork::new(seed);
    net.add_node(NodeConfig::root(1))?;
    let members: Vec<NodeId> = (0..points).map(|i| 2 + i as NodeId).collect();
    for &id in &members {
        net.add_node(NodeConfig::member(id))?;
        net.link(1, id)?;
    }
    for (i, &a) in members.iter().enumerate() {
        for &b in &members[i + 1..] {
            net.link(a, b)?;
        }
    }
    Ok(net)
}

/// Root `1`, two rival relays `2` and `3` beside it, and children `4`, `5`,
/// `6` who hear both relays but not the root.
pub fn fork(seed: u64) -> Result<SimNetwork, SimError> {
    let mut net = SimNetwork::new(seed);
    net.add_node(NodeConfig::root(1))?;
    for id in 2..=6 {
        net.add_node(NodeConfig::member(id))?;
    }
    net.link(1, 2)?;
    net.link(1, 3)?;
    net.link(2, 3)?;
    for child in 4..=6 {
        net.link(2, child)?;
        net.link(3, child)?;
    }
    net.link(4, 5)?;
    net.link(5, 6)?;
    net.link(4, 6)?;
    Ok(net)
}

/// A mixed-energy cluster for the energy-classes variant: root `1`, a
/// high-energy spine `2`–`3`, a mid node `4`, and low-energy nodes `5`–`8`
/// that could reach each other but should all end up as leaves under
/// high-energy parents.
pub fn energy_cluster(seed: u64) -> Result<SimNetwork, SimError> {
    let mut net = SimNetwork::new(seed);
    net.add_node(NodeConfig::root(1).with_variant(Variant::EnergyClasses))?;
    for id in 2..=8 {
        net.add_node(NodeConfig::member(id).with_variant(Variant::EnergyClasses))?;
    }
    net.link(1, 2)?;
    net.link(2, 3)?;
    net.link(2, 5)?;
    net.link(2, 6)?;
    net.link(5, 6)?;
    net.link(3, 7)?;
    net.link(3, 8)?;
    net.link(7, 8)?;
    net.link(3, 4)?;
    net.link(4, 7)?;
    net.link(4, 8)?;
    let energies = [
        (2, EnergyClass::High),
        (3, EnergyClass::High),
        (4, EnergyClass::Mid),
        (5, EnergyClass::Low),
        (6, EnergyClass::Low),
        (7, EnergyClass::Low),
        (8, EnergyClass::Low),
    ];
    for (id, class) in energies {
        net.node_mut(id)
            .ok_or(SimError::UnknownNode(id))?
            .set_energy_state(class);
    }
    Ok(net)
}
