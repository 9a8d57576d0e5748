//! One logical node
//!
//! Owns the radio, the tree controller, and the unicast layer, and wires
//! them together: incoming datagrams are dispatched by port, the controller
//! period and the unicast timers are multiplexed into a single wakeup, and
//! the application-facing API lives here. Keeping the node a plain value
//! lets a test or simulator host an entire network in one process.

use crate::config::{Tunables, ACKNOWLEDGEMENT_PORT, MESSAGING_PORT, TREE_GOSSIP_PORT};
use crate::radio::{NodeId, Port, Radio};
use crate::tree::{EnergyClass, Record, Role, StateSummary, TreeController, Variant};
use crate::unicast::{DeliveryHook, FailureHook, Unicast};
use crate::Millis;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: NodeId,
    pub role: Role,
    pub variant: Variant,
    pub tunables: Tunables,
}

impl NodeConfig {
    pub fn root(id: NodeId) -> Self {
        Self {
            id,
            role: Role::Root,
            variant: Variant::Base,
            tunables: Tunables::default(),
        }
    }

    pub fn member(id: NodeId) -> Self {
        Self {
            id,
            role: Role::Member,
            variant: Variant::Base,
            tunables: Tunables::default(),
        }
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_tunables(mut self, tunables: Tunables) -> Self {
        self.tunables = tunables;
        self
    }
}

pub struct Node<R: Radio> {
    radio: R,
    controller: TreeController,
    unicast: Unicast,
}

impl<R: Radio> Node<R> {
    pub fn new(config: NodeConfig, radio: R) -> Self {
        let controller = TreeController::new(
            config.id,
            config.role,
            config.variant,
            config.tunables.clone(),
        );
        let unicast = Unicast::new(
            config.id,
            matches!(config.role, Role::Root),
            config.tunables,
        );
        Self {
            radio,
            controller,
            unicast,
        }
    }

    pub fn id(&self) -> NodeId {
        self.controller.id()
    }

    pub fn role(&self) -> Role {
        self.controller.role()
    }

    /// Bring the radio up; the first controller period is due immediately.
    pub fn start(&mut self, now: Millis) {
        self.unicast.start(&mut self.radio);
        self.controller.start(&mut self.radio, now);
    }

    /// Run everything that is due at `now`.
    pub fn poll(&mut self, now: Millis) {
        if now >= self.controller.next_tick() {
            self.controller.tick(&mut self.radio, &mut self.unicast, now);
        }
        self.unicast.poll(&mut self.radio, now);
    }

    /// Earliest instant this node needs `poll` again.
    pub fn next_wakeup(&self) -> Millis {
        let tick = self.controller.next_tick();
        match self.unicast.next_wakeup() {
            Some(t) => tick.min(t),
            None => tick,
        }
    }

    /// Dispatch one received datagram to its subsystem.
    pub fn handle_datagram(&mut self, port: Port, src: NodeId, payload: &[u8], now: Millis) {
        match port {
            TREE_GOSSIP_PORT => self.controller.on_gossip_datagram(src, payload, now),
            MESSAGING_PORT => self.unicast.handle_data(&mut self.radio, src, payload, now),
            ACKNOWLEDGEMENT_PORT => self.unicast.handle_ack(&mut self.radio, src, now),
            other => warn!(node = self.id(), port = other, "datagram on unhandled port"),
        }
    }

    /// Queue a payload for delivery to the root. The sink has nowhere to
    /// send; its payloads are diagnosed and dropped.
    pub fn send(&mut self, payload: &[u8], now: Millis) {
        match self.role() {
            Role::Root => warn!(node = self.id(), "sink has no parent to send to"),
            Role::Member => self.unicast.send(&mut self.radio, payload, now),
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.controller.is_undefined()
    }

    pub fn is_leaf(&self) -> bool {
        self.controller.is_leaf()
    }

    pub fn record(&self) -> &Record {
        self.controller.record()
    }

    pub fn summary(&self) -> StateSummary {
        self.controller.summary()
    }

    pub fn set_energy_state(&mut self, class: EnergyClass) {
        self.controller.set_energy_state(class);
    }

    /// Register the sink's delivery hook.
    pub fn on_deliver(&mut self, hook: DeliveryHook) {
        self.unicast.set_delivery_hook(hook);
    }

    /// Register the per-hop failure hook.
    pub fn on_send_failure(&mut self, hook: FailureHook) {
        self.unicast.set_failure_hook(hook);
    }

    pub fn tree(&self) -> &TreeController {
        &self.controller
    }

    pub fn unicast(&self) -> &Unicast {
        &self.unicast
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRadio;
    use crate::tree::PARENT_NONE;

    fn node(config: NodeConfig) -> Node<SimRadio> {
        let radio = SimRadio::new(config.id);
        let mut node = Node::new(config, radio);
        node.start(0);
        node
    }

    #[test]
    fn test_start_opens_all_ports() {
        let n = node(NodeConfig::member(4));
        assert!(n.radio().is_open(TREE_GOSSIP_PORT));
        assert!(n.radio().is_open(MESSAGING_PORT));
        assert!(n.radio().is_open(ACKNOWLEDGEMENT_PORT));
    }

    #[test]
    fn test_unknown_port_is_dropped() {
        let mut n = node(NodeConfig::member(4));
        n.handle_datagram(9, 7, &[1, 2, 3], 0);
        assert_eq!(n.tree().gossip().len(), 0);
        assert_eq!(n.unicast().queue_len(), 0);
    }

    #[test]
    fn test_gossip_dispatch_reaches_controller() {
        let mut n = node(NodeConfig::member(4));
        n.handle_datagram(TREE_GOSSIP_PORT, 1, &Record::root().encode(Variant::Base), 0);
        assert_eq!(n.tree().gossip().len(), 1);
        n.poll(0);
        assert_eq!(n.record().parent, 1);
        assert!(n.is_leaf());
    }

    #[test]
    fn test_root_send_is_a_noop() {
        let mut n = node(NodeConfig::root(1));
        n.send(b"up", 0);
        assert_eq!(n.unicast().queue_len(), 0);
    }

    #[test]
    fn test_member_send_queues() {
        let mut n = node(NodeConfig::member(4));
        n.send(b"up", 0);
        assert_eq!(n.unicast().queue_len(), 1);
        assert_eq!(n.record().parent, PARENT_NONE);
    }

    #[test]
    fn test_next_wakeup_tracks_both_layers() {
        let mut n = node(NodeConfig::member(4));
        n.poll(0); // run the first period; next tick lands a period away
        let tick = n.next_wakeup();
        assert!(tick > 200, "period wakeup expected, got {tick}");
        n.send(b"up", 0);
        // The armed send timer is much sooner than the next period.
        assert!(n.next_wakeup() < tick);
    }
}
