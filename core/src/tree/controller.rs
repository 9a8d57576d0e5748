//! The spanning-tree controller
//!
//! One instance per node. Each period it evicts stale neighbors, scans the
//! neighborhood for a parent, publishes its fresh record over gossip, and
//! decides whether a leaf may power its radio down. The root skips the
//! election and pins its record to the sink sentinels.

use crate::config::{Tunables, TREE_GOSSIP_PORT};
use crate::gossip::{Gossip, GossipEvent};
use crate::radio::{NodeId, Radio};
use crate::tree::election;
use crate::tree::record::{
    change_is_significant, EnergyClass, Record, Variant, DIST_UNDEFINED, PARENT_NONE,
};
use crate::unicast::Unicast;
use crate::Millis;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use tracing::debug;

/// Whether this node is the sink of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Root,
    Member,
}

/// Snapshot of a node's tree state, printable for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct StateSummary {
    pub id: NodeId,
    pub role: Role,
    pub parent: NodeId,
    pub distance: u8,
    pub children: u8,
    pub energy: EnergyClass,
    pub neighbors: usize,
    pub awake: bool,
}

impl StateSummary {
    pub fn kind(&self) -> &'static str {
        match self.role {
            Role::Root => "root",
            Role::Member if self.parent == PARENT_NONE => "undefined",
            Role::Member if self.children > 0 => "backbone",
            Role::Member => "leaf",
        }
    }
}

impl fmt::Display for StateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}: {}", self.id, self.kind())?;
        if matches!(self.role, Role::Member) && self.parent != PARENT_NONE {
            write!(
                f,
                " parent={} distance={} children={}",
                self.parent, self.distance, self.children
            )?;
        }
        write!(
            f,
            " neighbors={} {}",
            self.neighbors,
            if self.awake { "awake" } else { "asleep" }
        )
    }
}

pub struct TreeController {
    id: NodeId,
    role: Role,
    variant: Variant,
    tunables: Tunables,
    gossip: Gossip,
    record: Record,
    energy: EnergyClass,
    /// Periods left before this node may sleep again.
    stay_active: u8,
    /// Shortens the next periods after a change for faster convergence.
    period_divisor: u8,
    /// A local change happened outside the tick (energy update, parent loss).
    pending_local_change: bool,
    rng: StdRng,
    next_tick: Millis,
}

impl TreeController {
    pub fn new(id: NodeId, role: Role, variant: Variant, tunables: Tunables) -> Self {
        let mut gossip = Gossip::new(
            TREE_GOSSIP_PORT,
            variant.wire_len(),
            tunables.neighbor_max_age_ms,
        );
        gossip.set_change_predicate(move |old, new| change_is_significant(variant, old, new));
        let record = match role {
            Role::Root => Record::root(),
            Role::Member => Record::undefined(),
        };
        Self {
            id,
            role,
            variant,
            tunables,
            gossip,
            record,
            energy: record.energy,
            stay_active: 0,
            period_divisor: 1,
            pending_local_change: false,
            rng: StdRng::seed_from_u64(u64::from(id)),
            next_tick: Millis::MAX,
        }
    }

    /// Bring the gossip port up and make the first period due immediately.
    pub fn start(&mut self, radio: &mut dyn Radio, now: Millis) {
        self.gossip.set_online(radio);
        self.next_tick = now;
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn gossip(&self) -> &Gossip {
        &self.gossip
    }

    pub fn next_tick(&self) -> Millis {
        self.next_tick
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self.role, Role::Member) && self.record.parent == PARENT_NONE
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.role, Role::Member)
            && self.record.parent != PARENT_NONE
            && self.record.children == 0
    }

    /// Publish a new battery classification with the next record.
    pub fn set_energy_state(&mut self, class: EnergyClass) {
        if self.energy != class {
            self.energy = class;
            self.pending_local_change = true;
        }
    }

    pub fn summary(&self) -> StateSummary {
        StateSummary {
            id: self.id,
            role: self.role,
            parent: self.record.parent,
            distance: self.record.distance,
            children: self.record.children,
            energy: self.energy,
            neighbors: self.gossip.len(),
            awake: self.gossip.is_online(),
        }
    }

    /// Route one gossip datagram into the neighbor table.
    pub fn on_gossip_datagram(&mut self, src: NodeId, payload: &[u8], now: Millis) {
        if let Some(event) = self.gossip.handle_datagram(src, payload, now) {
            self.note_event(event);
        }
    }

    /// Any neighborhood movement keeps the node awake for a few periods; the
    /// loss of the elected parent detaches us on the spot.
    fn note_event(&mut self, event: GossipEvent) {
        self.stay_active = self.tunables.stay_active_periods;
        if let GossipEvent::Removed(id) = event {
            if matches!(self.role, Role::Member)
                && self.record.parent != PARENT_NONE
                && id == self.record.parent
            {
                debug!(node = self.id, parent = id, "parent lost, detaching");
                self.record.distance = DIST_UNDEFINED;
                self.record.parent = PARENT_NONE;
                self.record.children = 0;
                self.record.class_distance = [DIST_UNDEFINED; 3];
                self.pending_local_change = true;
            }
        }
    }

    /// One period of the control loop.
    pub fn tick(&mut self, radio: &mut dyn Radio, unicast: &mut Unicast, now: Millis) {
        for event in self.gossip.remove_stale(now) {
            self.note_event(event);
        }

        match self.role {
            Role::Root => self.tick_root(radio, unicast),
            Role::Member => {
                self.tick_member(radio, unicast, now);
                unicast.set_parent(self.record.parent, now);
            }
        }
        self.schedule_next(now);
    }

    fn tick_root(&mut self, radio: &mut dyn Radio, unicast: &mut Unicast) {
        self.record = Record::root();
        self.record.energy = self.energy;
        self.gossip.set_online(radio);
        unicast.disallow_sleep(radio);
        let bytes = self.record.encode(self.variant);
        self.gossip.broadcast(radio, &bytes);
    }

    fn tick_member(&mut self, radio: &mut dyn Radio, unicast: &mut Unicast, now: Millis) {
        let outcome = election::run(self.variant, self.id, &self.gossip);
        if outcome.undefined_seen {
            self.stay_active = self.tunables.stay_active_periods;
        }

        let mut next = self.record;
        next.energy = self.energy;
        next.class_distance = outcome.class_distance;
        next.children = outcome.children;
        match outcome.best {
            Some(_) if outcome.equal_best > 1 && self.rng.gen_bool(0.5) => {
                // Several equally good parents means our neighbors probably
                // see the same symmetric picture. Sitting out one period as
                // undefined desynchronizes the competition.
                debug!(node = self.id, rivals = outcome.equal_best, "deferring symmetric election");
                next.distance = DIST_UNDEFINED;
                next.parent = PARENT_NONE;
            }
            Some(best) => {
                next.distance = best.distance;
                next.parent = best.id;
            }
            None => {
                next.distance = DIST_UNDEFINED;
                next.parent = PARENT_NONE;
            }
        }

        let changed = next.parent != self.record.parent
            || next.distance != self.record.distance
            || next.children != self.record.children;
        if changed || self.pending_local_change {
            self.stay_active = self.tunables.stay_active_periods;
            self.period_divisor = self.tunables.stay_active_periods;
            self.pending_local_change = false;
            debug!(
                node = self.id,
                parent = next.parent,
                distance = next.distance,
                children = next.children,
                "tree state changed"
            );
        }
        self.record = next;

        if self.record.parent == PARENT_NONE || self.record.children > 0 {
            // Undefined nodes and the backbone keep everything powered.
            self.gossip.set_online(radio);
            unicast.disallow_sleep(radio);
            let bytes = self.record.encode(self.variant);
            self.gossip.broadcast(radio, &bytes);
        } else {
            // A leaf may nap, but stays up one more period after any change,
            // or when its parent has not been heard from recently.
            unicast.allow_sleep(radio);
            let parent_fresh = self
                .gossip
                .get(self.record.parent)
                .map(|n| now.saturating_sub(n.last_heard) <= self.tunables.parent_max_age_ms)
                .unwrap_or(false);
            if self.stay_active > 0 || !parent_fresh {
                self.gossip.set_online(radio);
                let bytes = self.record.encode(self.variant);
                self.gossip.broadcast(radio, &bytes);
            } else {
                debug!(node = self.id, "leaf going off-radio for a period");
                self.gossip.set_offline(radio);
            }
        }
    }

    fn schedule_next(&mut self, now: Millis) {
        let jitter: f64 = self.rng.gen_range(0.8..1.0);
        let divisor = self.period_divisor.max(1);
        let wait = (self.tunables.period_ms as f64 * jitter / f64::from(divisor)) as u64;
        self.next_tick = now + wait.max(1);
        self.stay_active = self.stay_active.saturating_sub(1);
        if self.period_divisor > 1 {
            self.period_divisor -= 1;
        }
    }
}
