//! Spanning-tree construction
//!
//! - `record`: the state each node publishes and its wire codec
//! - `election`: the per-period parent scan for every protocol variant
//! - `controller`: the period state machine, sleep policy, and publication

pub mod controller;
pub mod election;
pub mod record;

pub use controller::{Role, StateSummary, TreeController};
pub use election::{Candidate, Election};
pub use record::{
    change_is_significant, EnergyClass, Record, RecordError, Variant, CHILDREN_ROOT, DIST_MAX,
    DIST_UNDEFINED, PARENT_NONE, PARENT_ROOT,
};
