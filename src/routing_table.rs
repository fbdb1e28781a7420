//! Routing-table entries created as a side effect of forwarding a trail
//! setup; they live independently of the fingers that caused their
//! creation (spec.md §3).

use crate::peer_id::PeerId;
use crate::trail::TrailId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    SrcToDest,
    DestToSrc,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::SrcToDest => Direction::DestToSrc,
            Direction::DestToSrc => Direction::SrcToDest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingEntry {
    pub trail_id: TrailId,
    pub prev_hop: PeerId,
    pub next_hop: PeerId,
}

impl RoutingEntry {
    /// The peer to forward to, given which way the message is travelling.
    pub fn next_for(&self, direction: Direction) -> PeerId {
        match direction {
            Direction::SrcToDest => self.next_hop,
            Direction::DestToSrc => self.prev_hop,
        }
    }
}

#[derive(Debug)]
pub enum InsertOutcome {
    Inserted,
    /// spec.md §4.4 step 1: capacity exhausted.
    Full,
    /// SPEC_FULL §4 item 1: trail_id already present with a different
    /// (prev_hop, next_hop) pair.
    Conflict,
}

/// Map `trail_id -> (prev_hop, next_hop)`. Bidirectional: `next_for`
/// resolves both src->dst and dst->src lookups from the one entry
/// (spec.md §4.4 Teardown: "each has a src→dst and dst→src lookup").
#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: HashMap<TrailId, RoutingEntry>,
    capacity: usize,
}

impl RoutingTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn get(&self, trail_id: &TrailId) -> Option<&RoutingEntry> {
        self.entries.get(trail_id)
    }

    pub fn insert(&mut self, entry: RoutingEntry) -> InsertOutcome {
        if let Some(existing) = self.entries.get(&entry.trail_id) {
            if existing.prev_hop == entry.prev_hop && existing.next_hop == entry.next_hop {
                return InsertOutcome::Inserted;
            }
            return InsertOutcome::Conflict;
        }
        if self.is_full() {
            return InsertOutcome::Full;
        }
        self.entries.insert(entry.trail_id, entry);
        InsertOutcome::Inserted
    }

    pub fn remove(&mut self, trail_id: &TrailId) -> Option<RoutingEntry> {
        self.entries.remove(trail_id)
    }

    /// Removes every entry that mentions `peer` as either hop, returning
    /// them for CONNECTION_BROKEN propagation (spec.md §4.4).
    pub fn remove_for_peer(&mut self, peer: &PeerId) -> Vec<RoutingEntry> {
        let to_remove: Vec<TrailId> = self
            .entries
            .values()
            .filter(|e| e.prev_hop == *peer || e.next_hop == *peer)
            .map(|e| e.trail_id)
            .collect();
        to_remove
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(seed: &[u8]) -> PeerId {
        PeerId::derive_for_test(seed)
    }

    #[test]
    fn rejects_conflicting_trail_id() {
        let mut rt = RoutingTable::new(10);
        let tid = TrailId::random();
        let e1 = RoutingEntry {
            trail_id: tid,
            prev_hop: pid(b"a"),
            next_hop: pid(b"b"),
        };
        assert!(matches!(rt.insert(e1), InsertOutcome::Inserted));
        let e2 = RoutingEntry {
            trail_id: tid,
            prev_hop: pid(b"c"),
            next_hop: pid(b"d"),
        };
        assert!(matches!(rt.insert(e2), InsertOutcome::Conflict));
    }

    #[test]
    fn rejects_when_full() {
        let mut rt = RoutingTable::new(1);
        rt.insert(RoutingEntry {
            trail_id: TrailId::random(),
            prev_hop: pid(b"a"),
            next_hop: pid(b"b"),
        });
        let outcome = rt.insert(RoutingEntry {
            trail_id: TrailId::random(),
            prev_hop: pid(b"c"),
            next_hop: pid(b"d"),
        });
        assert!(matches!(outcome, InsertOutcome::Full));
    }

    #[test]
    fn bidirectional_lookup() {
        let entry = RoutingEntry {
            trail_id: TrailId::random(),
            prev_hop: pid(b"a"),
            next_hop: pid(b"b"),
        };
        assert_eq!(entry.next_for(Direction::SrcToDest), pid(b"b"));
        assert_eq!(entry.next_for(Direction::DestToSrc), pid(b"a"));
    }

    #[test]
    fn remove_for_peer_clears_mentions() {
        let mut rt = RoutingTable::new(10);
        let a = pid(b"a");
        let b = pid(b"b");
        let c = pid(b"c");
        rt.insert(RoutingEntry {
            trail_id: TrailId::random(),
            prev_hop: a,
            next_hop: b,
        });
        rt.insert(RoutingEntry {
            trail_id: TrailId::random(),
            prev_hop: b,
            next_hop: c,
        });
        let removed = rt.remove_for_peer(&b);
        assert_eq!(removed.len(), 2);
        assert!(rt.is_empty());
    }
}
