//! Canopy — a maximum-leaf spanning tree for sleepy sensor networks
//!
//! Every node periodically gossips a tiny state record to its one-hop
//! neighborhood and elects a parent from what it hears, shaping a spanning
//! tree rooted at the sink with as many leaves as the heuristic can manage.
//! Leaves power their radios down between periods; the interior backbone
//! stays up and carries application payloads hop by hop toward the root,
//! each hop acknowledged, retried, and deduplicated.
//!
//! The stack is written against the [`radio::Radio`] trait and a virtual
//! millisecond clock, so the [`sim`] module can host whole networks in one
//! process — which is also how the integration tests and the demo CLI run.

pub mod config;
pub mod gossip;
pub mod node;
pub mod radio;
pub mod sim;
pub mod tree;
pub mod unicast;

pub use config::Tunables;
pub use node::{Node, NodeConfig};
pub use radio::{NodeId, Port, Radio};
pub use tree::{EnergyClass, Role, StateSummary, Variant};

/// Instant on the virtual clock, in milliseconds since an arbitrary origin.
pub type Millis = u64;
