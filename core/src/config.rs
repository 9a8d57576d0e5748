//! Protocol tunables
//!
//! Every timing and capacity knob in one table so tests and scenario files
//! can tighten or relax them without touching the components. Defaults are
//! the deployment values.

use crate::radio::Port;
use serde::{Deserialize, Serialize};

/// Gossip port of the tree controller.
pub const TREE_GOSSIP_PORT: Port = 154;

/// Data port of the reliable-unicast layer.
pub const MESSAGING_PORT: Port = 181;

/// Acknowledgement port of the reliable-unicast layer.
pub const ACKNOWLEDGEMENT_PORT: Port = 182;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// Dedup history capacity per node.
    pub max_history: usize,
    /// Send-queue bound; enqueue on a full queue is a diagnosed no-op.
    pub max_queue_depth: usize,
    /// How long a transmitted frame waits for its acknowledgement.
    pub ack_timeout_ms: u64,
    /// Transmissions beyond this count drop the frame.
    pub max_tries: u8,
    /// Spacing between consecutive sends, scaled by uniform[0.5, 1.0].
    pub next_msg_delay_ms: u64,
    /// Backoff base after a timeout, scaled by tries² × uniform(0, 1).
    pub fail_delay_ms: u64,
    /// Neighbors silent longer than this are evicted.
    pub neighbor_max_age_ms: u64,
    /// Controller period, scaled by uniform[0.8, 1.0] and divided during churn.
    pub period_ms: u64,
    /// Periods a node stays awake after observing any change.
    pub stay_active_periods: u8,
    /// A leaf whose parent record is older than this must stay awake.
    pub parent_max_age_ms: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_history: 30,
            max_queue_depth: 64,
            ack_timeout_ms: 200,
            max_tries: 5,
            next_msg_delay_ms: 10,
            fail_delay_ms: 100,
            neighbor_max_age_ms: 15_000,
            period_ms: 1_000,
            stay_active_periods: 3,
            parent_max_age_ms: 5_000,
        }
    }
}
