//! Trails: source-routed paths from a finger-holder to a non-friend
//! finger (spec.md §3, Glossary).

use crate::peer_id::PeerId;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 512-bit random trail identifier, unique across the network with
/// overwhelming probability.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrailId(#[serde(with = "crate::wire_bytes")] [u8; 64]);

impl TrailId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const ZERO: TrailId = TrailId([0u8; 64]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 64]
    }

    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for TrailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrailId({:02x}{:02x}{:02x}{:02x}..)", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// An ordered, source-routed path. `hops` excludes both endpoints (the
/// root that owns the finger, and the finger/target itself) per spec.md §3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trail {
    pub id: TrailId,
    pub hops: Vec<PeerId>,
}

impl Trail {
    pub fn new(id: TrailId, hops: Vec<PeerId>) -> Self {
        Self { id, hops }
    }

    pub fn length(&self) -> u32 {
        self.hops.len() as u32
    }

    pub fn first_hop(&self) -> Option<PeerId> {
        self.hops.first().copied()
    }

    /// Invariant check: no PeerId appears twice on a trail (spec.md §3).
    pub fn has_distinct_hops(&self) -> bool {
        for i in 0..self.hops.len() {
            for j in (i + 1)..self.hops.len() {
                if self.hops[i] == self.hops[j] {
                    return false;
                }
            }
        }
        true
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.hops.contains(peer)
    }

    /// spec.md §9: "before appending a peer to a trail, reject setup if
    /// self ∈ trail.hops". Enforced at every hop by the trail engine, not
    /// just checked here, but exposed as a reusable predicate.
    pub fn would_duplicate(&self, candidate: PeerId) -> bool {
        self.contains(&candidate)
    }

    /// Reversed hop order, used when propagating setup results and
    /// verify-successor replies back along a trail.
    pub fn reversed_hops(&self) -> Vec<PeerId> {
        let mut h = self.hops.clone();
        h.reverse();
        h
    }
}
