//! Receive history for duplicate suppression
//!
//! Keyed by source id, one entry per source, bounded in total. Recording a
//! fresh sequence number first evicts the source's old entry, then inserts
//! at the tail, then trims from the head until the bound holds — so the
//! oldest sources are the ones a busy forwarder forgets first.

use crate::radio::NodeId;
use std::collections::VecDeque;
use tracing::debug;

pub struct History {
    entries: VecDeque<(NodeId, u8)>,
    cap: usize,
}

impl History {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Whether `seq` is the most recent number recorded for `src`.
    pub fn contains(&self, src: NodeId, seq: u8) -> bool {
        self.entries.iter().any(|&(s, q)| s == src && q == seq)
    }

    pub fn last_seq(&self, src: NodeId) -> Option<u8> {
        self.entries
            .iter()
            .find(|&&(s, _)| s == src)
            .map(|&(_, q)| q)
    }

    /// Evict-then-insert, then enforce the bound from the oldest end.
    pub fn record(&mut self, src: NodeId, seq: u8) {
        self.entries.retain(|&(s, _)| s != src);
        self.entries.push_back((src, seq));
        while self.entries.len() > self.cap {
            if let Some((old, _)) = self.entries.pop_front() {
                debug!(source = old, "history full, forgetting oldest source");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_one_entry_per_source() {
        let mut h = History::new(30);
        h.record(7, 1);
        h.record(7, 2);
        h.record(7, 3);
        assert_eq!(h.len(), 1);
        assert_eq!(h.last_seq(7), Some(3));
        assert!(!h.contains(7, 2));
        assert!(h.contains(7, 3));
    }

    #[test]
    fn test_overflow_forgets_oldest_source() {
        let mut h = History::new(3);
        h.record(1, 0);
        h.record(2, 0);
        h.record(3, 0);
        h.record(4, 0);
        assert_eq!(h.len(), 3);
        assert!(h.last_seq(1).is_none());
        assert!(h.contains(4, 0));
    }

    #[test]
    fn test_rerecording_refreshes_position() {
        let mut h = History::new(3);
        h.record(1, 0);
        h.record(2, 0);
        h.record(3, 0);
        // Source 1 speaks again, so it is no longer the oldest.
        h.record(1, 1);
        h.record(4, 0);
        assert!(h.contains(1, 1));
        assert!(h.last_seq(2).is_none());
    }

    proptest! {
        #[test]
        fn prop_bound_and_uniqueness_hold(ops in prop::collection::vec((0u16..8, any::<u8>()), 0..200)) {
            let mut h = History::new(5);
            for (src, seq) in ops {
                h.record(src, seq);
                prop_assert!(h.len() <= 5);
                prop_assert_eq!(h.last_seq(src), Some(seq));
                // One entry per source: sum of per-source hits equals len.
                let mut seen = std::collections::HashSet::new();
                for &(s, _) in h.entries.iter() {
                    prop_assert!(seen.insert(s));
                }
            }
        }
    }
}
