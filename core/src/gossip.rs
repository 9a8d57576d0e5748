//! Neighborhood gossip fabric
//!
//! Each instance owns one port and a table of one-hop neighbors, keyed by
//! node id. A neighbor entry holds the latest record heard from that node
//! and the time it was heard; entries silent for longer than `max_age` are
//! evicted by the periodic freshness pass. Reception and eviction report
//! [`GossipEvent`]s which the owner routes to whoever cares — the table
//! itself never calls back into its client.

use crate::radio::{LinkAddr, NodeId, Port, Radio};
use crate::Millis;
use tracing::{debug, warn};

/// Significance test over old and new record bytes. Returning `false`
/// suppresses the `Changed` event for that reception.
pub type ChangePredicate = Box<dyn Fn(&[u8], &[u8]) -> bool + Send>;

/// What a reception or freshness pass observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GossipEvent {
    /// First record heard from this neighbor.
    New(NodeId),
    /// A significant change in a known neighbor's record.
    Changed(NodeId),
    /// The neighbor went silent and its entry was evicted.
    Removed(NodeId),
}

/// One live neighbor and its latest published record.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub id: NodeId,
    pub addr: LinkAddr,
    /// When the most recent record arrived.
    pub last_heard: Millis,
    /// Copy of the neighbor's most recent record.
    pub record: Vec<u8>,
}

/// Gossip instance: one port, one record layout, one neighbor table.
pub struct Gossip {
    port: Port,
    record_len: usize,
    max_age_ms: u64,
    online: bool,
    /// Insertion-ordered so iteration is stable across receptions.
    neighbors: Vec<Neighbor>,
    changed: ChangePredicate,
}

impl Gossip {
    pub fn new(port: Port, record_len: usize, max_age_ms: u64) -> Self {
        Self {
            port,
            record_len,
            max_age_ms,
            online: false,
            neighbors: Vec::new(),
            changed: Box::new(|old, new| old != new),
        }
    }

    pub fn port(&self) -> Port {
        self.port
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Replace the default byte-equality significance test.
    pub fn set_change_predicate(&mut self, pred: impl Fn(&[u8], &[u8]) -> bool + Send + 'static) {
        self.changed = Box::new(pred);
    }

    pub fn set_online(&mut self, radio: &mut dyn Radio) {
        if !self.online {
            radio.open(self.port);
            self.online = true;
        }
    }

    pub fn set_offline(&mut self, radio: &mut dyn Radio) {
        if self.online {
            radio.close(self.port);
            self.online = false;
        }
    }

    /// Transmit `record` as one datagram on this instance's port.
    ///
    /// While offline the port is opened just long enough to send. Link
    /// errors are logged and swallowed; gossip is best-effort and a missed
    /// broadcast only delays the neighbors' freshness stamps.
    pub fn broadcast(&mut self, radio: &mut dyn Radio, record: &[u8]) {
        debug_assert_eq!(record.len(), self.record_len);
        let momentary = !self.online;
        if momentary {
            radio.open(self.port);
        }
        if let Err(err) = radio.broadcast(self.port, record) {
            debug!(port = self.port, %err, "gossip broadcast failed");
        }
        if momentary {
            radio.close(self.port);
        }
    }

    /// Evict every neighbor silent for longer than `max_age`.
    ///
    /// Eviction is driven only by this pass, never by incoming traffic, so
    /// the client must call it periodically (the tree controller does so at
    /// the top of each period).
    pub fn remove_stale(&mut self, now: Millis) -> Vec<GossipEvent> {
        let mut events = Vec::new();
        self.neighbors.retain(|n| {
            let live = now.saturating_sub(n.last_heard) <= self.max_age_ms;
            if !live {
                debug!(neighbor = n.id, "evicting silent neighbor");
                events.push(GossipEvent::Removed(n.id));
            }
            live
        });
        events
    }

    /// Process one datagram from `src`.
    pub fn handle_datagram(
        &mut self,
        src: NodeId,
        payload: &[u8],
        now: Millis,
    ) -> Option<GossipEvent> {
        if payload.len() != self.record_len {
            warn!(
                port = self.port,
                src,
                len = payload.len(),
                expected = self.record_len,
                "dropping malformed gossip record"
            );
            return None;
        }
        match self.neighbors.iter_mut().find(|n| n.id == src) {
            Some(entry) => {
                let significant = (self.changed)(&entry.record, payload);
                entry.record.clear();
                entry.record.extend_from_slice(payload);
                entry.last_heard = now;
                significant.then_some(GossipEvent::Changed(src))
            }
            None => {
                self.neighbors.push(Neighbor {
                    id: src,
                    addr: LinkAddr::from_node(src),
                    last_heard: now,
                    record: payload.to_vec(),
                });
                Some(GossipEvent::New(src))
            }
        }
    }

    /// Live neighbors in stable insertion order.
    pub fn neighbors(&self) -> impl Iterator<Item = &Neighbor> {
        self.neighbors.iter()
    }

    pub fn get(&self, id: NodeId) -> Option<&Neighbor> {
        self.neighbors.iter().find(|n| n.id == id)
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRadio;

    fn gossip() -> Gossip {
        Gossip::new(154, 4, 15_000)
    }

    #[test]
    fn test_first_reception_reports_new() {
        let mut g = gossip();
        let ev = g.handle_datagram(7, &[1, 2, 3, 4], 100);
        assert_eq!(ev, Some(GossipEvent::New(7)));
        assert_eq!(g.len(), 1);
        assert_eq!(g.get(7).unwrap().record, vec![1, 2, 3, 4]);
        assert_eq!(g.get(7).unwrap().last_heard, 100);
    }

    #[test]
    fn test_changed_record_reports_change() {
        let mut g = gossip();
        g.handle_datagram(7, &[1, 2, 3, 4], 100);
        let ev = g.handle_datagram(7, &[1, 2, 3, 5], 200);
        assert_eq!(ev, Some(GossipEvent::Changed(7)));
        assert_eq!(g.get(7).unwrap().record, vec![1, 2, 3, 5]);
        assert_eq!(g.get(7).unwrap().last_heard, 200);
    }

    #[test]
    fn test_identical_record_is_silent_but_refreshes() {
        let mut g = gossip();
        g.handle_datagram(7, &[1, 2, 3, 4], 100);
        let ev = g.handle_datagram(7, &[1, 2, 3, 4], 9_000);
        assert_eq!(ev, None);
        assert_eq!(g.get(7).unwrap().last_heard, 9_000);
    }

    #[test]
    fn test_custom_predicate_suppresses_change() {
        let mut g = gossip();
        // Only the last byte matters.
        g.set_change_predicate(|old, new| old.last() != new.last());
        g.handle_datagram(7, &[1, 2, 3, 4], 100);
        assert_eq!(g.handle_datagram(7, &[9, 9, 9, 4], 200), None);
        assert_eq!(
            g.handle_datagram(7, &[9, 9, 9, 5], 300),
            Some(GossipEvent::Changed(7))
        );
    }

    #[test]
    fn test_wrong_length_is_dropped() {
        let mut g = gossip();
        assert_eq!(g.handle_datagram(7, &[1, 2, 3], 100), None);
        assert!(g.is_empty());
    }

    #[test]
    fn test_stale_neighbors_are_evicted() {
        let mut g = gossip();
        g.handle_datagram(7, &[1, 2, 3, 4], 0);
        g.handle_datagram(8, &[1, 2, 3, 4], 10_000);

        // Nothing is stale yet.
        assert!(g.remove_stale(10_000).is_empty());

        let events = g.remove_stale(16_000);
        assert_eq!(events, vec![GossipEvent::Removed(7)]);
        assert!(g.get(7).is_none());
        assert!(g.get(8).is_some());
    }

    #[test]
    fn test_reception_alone_never_evicts() {
        let mut g = gossip();
        g.handle_datagram(7, &[1, 2, 3, 4], 0);
        // A much later reception from someone else leaves the stale entry alone.
        g.handle_datagram(8, &[1, 2, 3, 4], 50_000);
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn test_iteration_is_insertion_ordered() {
        let mut g = gossip();
        g.handle_datagram(9, &[0; 4], 0);
        g.handle_datagram(3, &[0; 4], 1);
        g.handle_datagram(6, &[0; 4], 2);
        g.handle_datagram(3, &[1; 4], 3); // update must not reorder
        let ids: Vec<NodeId> = g.neighbors().map(|n| n.id).collect();
        assert_eq!(ids, vec![9, 3, 6]);
    }

    #[test]
    fn test_offline_broadcast_opens_momentarily() {
        let mut g = gossip();
        let mut radio = SimRadio::new(1);
        g.set_online(&mut radio);
        g.set_offline(&mut radio);
        assert!(!radio.is_open(154));

        g.broadcast(&mut radio, &[1, 2, 3, 4]);

        // The frame went out but the port is closed again.
        assert!(!radio.is_open(154));
        assert_eq!(radio.outgoing.len(), 1);
        assert_eq!(radio.outgoing[0].payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_online_broadcast_keeps_port_open() {
        let mut g = gossip();
        let mut radio = SimRadio::new(1);
        g.set_online(&mut radio);
        g.broadcast(&mut radio, &[1, 2, 3, 4]);
        assert!(radio.is_open(154));
    }
}
