//! Parent election
//!
//! One pass over the neighbor table per period. Neighbors publishing an
//! undefined parent are counted as potential children (they may attach to us
//! next period); neighbors naming us are actual children; everyone else is a
//! parent candidate ranked by the variant's preference order. The scan never
//! mutates anything — it returns an [`Election`] the controller acts on.

use crate::gossip::Gossip;
use crate::radio::NodeId;
use crate::tree::record::{EnergyClass, Record, Variant, DIST_MAX, DIST_UNDEFINED, PARENT_NONE};
use std::cmp::Ordering;
use tracing::warn;

/// A neighbor that could serve as our parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: NodeId,
    /// Our own distance if this candidate is adopted.
    pub distance: u8,
    pub children: u8,
    pub energy: EnergyClass,
}

/// Outcome of one neighborhood scan.
#[derive(Debug, Clone)]
pub struct Election {
    /// Actual children plus still-undefined neighbors that may attach.
    pub children: u8,
    /// Whether any neighbor published an undefined parent.
    pub undefined_seen: bool,
    pub best: Option<Candidate>,
    /// How many candidates tied for best quality. More than one means the
    /// neighborhood is symmetric and the controller may defer a period to
    /// break it.
    pub equal_best: u32,
    /// Hop counts toward the root in the high/mid/low candidate trees
    /// (energy-classes variant; `0xFF` elsewhere).
    pub class_distance: [u8; 3],
}

impl Election {
    fn new() -> Self {
        Election {
            children: 0,
            undefined_seen: false,
            best: None,
            equal_best: 0,
            class_distance: [DIST_UNDEFINED; 3],
        }
    }
}

/// Scan the neighborhood once and rank parent candidates.
pub fn run(variant: Variant, own_id: NodeId, gossip: &Gossip) -> Election {
    match variant {
        Variant::EnergyClasses => scan_classes(own_id, gossip),
        _ => scan_single(variant, own_id, gossip),
    }
}

/// The single-distance variants: plain hop count, energy tie-break, and
/// energy-weighted edges.
fn scan_single(variant: Variant, own_id: NodeId, gossip: &Gossip) -> Election {
    let mut out = Election::new();
    for n in gossip.neighbors() {
        let rec = match Record::decode(variant, &n.record) {
            Ok(rec) => rec,
            Err(err) => {
                warn!(neighbor = n.id, %err, "ignoring undecodable neighbor record");
                continue;
            }
        };
        if rec.parent == PARENT_NONE {
            out.children = out.children.saturating_add(1);
            out.undefined_seen = true;
            continue;
        }
        if rec.parent == own_id {
            out.children = out.children.saturating_add(1);
            continue;
        }
        if rec.distance == DIST_UNDEFINED {
            continue;
        }
        let step = match variant {
            Variant::EnergyWeighted => rec.energy.weight(),
            _ => 1,
        };
        consider(
            &mut out,
            Candidate {
                id: n.id,
                distance: rec.distance.saturating_add(step).min(DIST_MAX),
                children: rec.children,
                energy: rec.energy,
            },
            variant,
        );
    }
    out
}

fn consider(out: &mut Election, cand: Candidate, variant: Variant) {
    // First candidate wins unconditionally; comparisons only happen against
    // an installed best.
    let Some(best) = out.best else {
        out.best = Some(cand);
        out.equal_best = 1;
        return;
    };
    match quality(&cand, variant).cmp(&quality(&best, variant)) {
        Ordering::Less => {
            out.best = Some(cand);
            out.equal_best = 1;
        }
        Ordering::Equal => {
            out.equal_best += 1;
            if cand.id < best.id {
                out.best = Some(cand);
            }
        }
        Ordering::Greater => {}
    }
}

/// Preference key, smaller is better: distance first, then (energy tie-break
/// only) remaining energy, then the candidate with more children — attaching
/// to an already-loaded parent keeps more of the neighborhood leaf-eligible.
fn quality(c: &Candidate, variant: Variant) -> (u8, u8, u8) {
    let energy = match variant {
        Variant::EnergyTiebreak => c.energy.rank(),
        _ => 0,
    };
    (c.distance, energy, u8::MAX - c.children)
}

/// Class index into `class_distance`: high, mid, low.
const HIGH: usize = 0;
const MID: usize = 1;
const LOW: usize = 2;

/// Whether a neighbor with this energy may serve as an interior node of the
/// given candidate tree. High-class interiors must be energy-rich;
/// the low class takes anyone, undeclared energy included.
fn may_parent_in(energy: EnergyClass, class: usize) -> bool {
    match class {
        HIGH => energy == EnergyClass::High,
        MID => matches!(energy, EnergyClass::High | EnergyClass::Mid),
        _ => true,
    }
}

/// The energy-classes variant: each neighbor advertises a distance in up to
/// three candidate trees, and we elect the best candidate of the richest
/// nonempty class.
fn scan_classes(own_id: NodeId, gossip: &Gossip) -> Election {
    let mut out = Election::new();
    let mut class_best: [Option<Candidate>; 3] = [None; 3];
    for n in gossip.neighbors() {
        let rec = match Record::decode(Variant::EnergyClasses, &n.record) {
            Ok(rec) => rec,
            Err(err) => {
                warn!(neighbor = n.id, %err, "ignoring undecodable neighbor record");
                continue;
            }
        };
        if rec.parent == PARENT_NONE {
            out.children = out.children.saturating_add(1);
            out.undefined_seen = true;
            continue;
        }
        if rec.parent == own_id {
            out.children = out.children.saturating_add(1);
            continue;
        }
        for class in [HIGH, MID, LOW] {
            if !may_parent_in(rec.energy, class) {
                continue;
            }
            let advertised = rec.class_distance[class];
            if advertised == DIST_UNDEFINED {
                continue;
            }
            let distance = advertised.saturating_add(1).min(DIST_MAX);
            if distance > out.class_distance[class] {
                continue;
            }
            let cand = Candidate {
                id: n.id,
                distance,
                children: rec.children,
                energy: rec.energy,
            };
            match class_best[class] {
                None => {
                    class_best[class] = Some(cand);
                    out.class_distance[class] = distance;
                }
                Some(best) if distance < best.distance => {
                    class_best[class] = Some(cand);
                    out.class_distance[class] = distance;
                }
                Some(best)
                    if cand.children > best.children
                        || (cand.children == best.children && cand.id < best.id) =>
                {
                    class_best[class] = Some(cand);
                }
                Some(_) => {}
            }
        }
    }
    // Elect from the richest class that produced a candidate.
    for class in [HIGH, MID, LOW] {
        if let Some(best) = class_best[class] {
            out.best = Some(best);
            out.equal_best = 1;
            break;
        }
    }
    out
}
