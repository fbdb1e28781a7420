//! Finger table: this node's routing-by-id entries (spec.md §4.3).
//!
//! A finger may be backed by a direct [`crate::friend::Friend`] link (no
//! trail needed), by this node itself (only possible for slot 0 when this
//! node is alone), or by up to `K` parallel [`Trail`]s.

use crate::friend::FriendTable;
use crate::peer_id::{closest_peer, PeerId, FINGER_COUNT, PREDECESSOR_INDEX};
use crate::trail::{Trail, TrailId};
use rand::seq::IteratorRandom;
use std::time::Instant;

#[derive(Debug, Clone)]
pub enum FingerBacking {
    SelfId,
    Friend,
    Trails(Vec<Trail>),
}

#[derive(Debug, Clone)]
pub struct Finger {
    pub identity: PeerId,
    pub table_index: usize,
    pub backing: FingerBacking,
}

impl Finger {
    pub fn trails(&self) -> &[Trail] {
        match &self.backing {
            FingerBacking::Trails(t) => t,
            _ => &[],
        }
    }

    pub fn is_self(&self) -> bool {
        matches!(self.backing, FingerBacking::SelfId)
    }

    pub fn is_friend(&self) -> bool {
        matches!(self.backing, FingerBacking::Friend)
    }
}

/// What a caller handed in to be installed at a slot.
#[derive(Debug, Clone)]
pub enum FingerArrival {
    SelfId,
    Friend,
    Remote(Trail),
}

/// Side effects the caller (trail engine / overlay) must carry out after
/// an `add`. Kept a plain data struct so `FingerTable` stays pure and unit
/// testable without a transport.
#[derive(Debug, Default)]
pub struct FingerAddOutcome {
    pub stored: bool,
    /// Trails that must receive TRAIL_TEARDOWN.
    pub teardown_trails: Vec<Trail>,
    /// First-hop friends whose `trails_count` must be decremented, one per
    /// torn-down trail in `teardown_trails`.
    pub friend_decrements: Vec<PeerId>,
    /// Set when a friend-backed finger was newly installed (increment
    /// that friend's `trails_count` by 1).
    pub friend_increment: Option<PeerId>,
    /// Set when a friend-backed finger was evicted/replaced (undo its
    /// `trails_count` increment).
    pub friend_decrement_single: Option<PeerId>,
    pub search_pointer_reset: bool,
    pub verify_successor_needed: bool,
    /// Set when a newly-installed or merged trail has a non-first hop that
    /// is already reachable as a direct friend: describes the
    /// TRAIL_COMPRESSION the caller should send (spec.md §4.4 Compression;
    /// SPEC_FULL §4 item 5).
    pub compression: Option<CompressionRequest>,
}

/// A shortcut discovered while scanning a trail's intermediate hops
/// against the friend table: `new_first_friend` is already a direct
/// friend, so the trail can start there instead of at its original first
/// hop.
#[derive(Debug, Clone, Copy)]
pub struct CompressionRequest {
    pub trail_id: TrailId,
    pub old_first_hop: PeerId,
    pub new_first_friend: PeerId,
}

/// Scans `trail`'s hops (excluding its current first hop, which is by
/// definition already a friend) for the earliest one that is itself a
/// friend, and if found, shortens the trail to begin there.
fn compress_if_possible(trail: Trail, friends: &FriendTable) -> (Trail, Option<CompressionRequest>) {
    let found = trail
        .hops
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, h)| friends.contains(h));
    match found {
        Some((idx, &new_first_friend)) => {
            let request = CompressionRequest {
                trail_id: trail.id,
                old_first_hop: trail.hops[0],
                new_first_friend,
            };
            (Trail::new(trail.id, trail.hops[idx..].to_vec()), Some(request))
        }
        None => (trail, None),
    }
}

pub struct FingerTable {
    my_id: PeerId,
    slots: [Option<Finger>; FINGER_COUNT],
    pub current_search_index: usize,
    max_trails_per_finger: usize,
}

impl FingerTable {
    pub fn new(my_id: PeerId, max_trails_per_finger: usize) -> Self {
        const NONE: Option<Finger> = None;
        Self {
            my_id,
            slots: [NONE; FINGER_COUNT],
            current_search_index: 0,
            max_trails_per_finger,
        }
    }

    pub fn get(&self, index: usize) -> Option<&Finger> {
        self.slots[index].as_ref()
    }

    pub fn successor(&self) -> Option<&Finger> {
        self.slots[0].as_ref()
    }

    pub fn predecessor(&self) -> Option<&Finger> {
        self.slots[PREDECESSOR_INDEX].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Finger> {
        self.slots.iter().filter_map(|f| f.as_ref())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn decrement_index(i: usize) -> usize {
        if i == 0 {
            PREDECESSOR_INDEX
        } else {
            i - 1
        }
    }

    /// spec.md §4.3 `add`.
    pub fn add(
        &mut self,
        identity: PeerId,
        arrival: FingerArrival,
        table_index: usize,
        ultimate_value: u64,
        friends: &FriendTable,
    ) -> FingerAddOutcome {
        let mut outcome = FingerAddOutcome::default();
        let is_predecessor = table_index == PREDECESSOR_INDEX;

        // Step 1: loop prevention against the already-known successor.
        if table_index != 0 {
            if let Some(succ) = &self.slots[0] {
                if succ.identity == identity {
                    self.current_search_index = 0;
                    outcome.search_pointer_reset = true;
                    return outcome;
                }
            }
        }

        // SPEC_FULL §4 item 5 scan-and-compress: a remote trail whose path
        // already runs through a direct friend can start there instead.
        let arrival = match arrival {
            FingerArrival::Remote(trail) => {
                let (trail, compression) = compress_if_possible(trail, friends);
                outcome.compression = compression;
                FingerArrival::Remote(trail)
            }
            other => other,
        };

        match self.slots[table_index].take() {
            None => {
                self.install(table_index, identity, arrival, &mut outcome);
            }
            Some(existing) if existing.identity != identity => {
                let winner = closest_peer(
                    existing.identity.value64(),
                    identity.value64(),
                    ultimate_value,
                    is_predecessor,
                );
                if winner == identity.value64() {
                    self.teardown_finger(existing, &mut outcome);
                    self.install(table_index, identity, arrival, &mut outcome);
                } else {
                    self.slots[table_index] = Some(existing);
                    outcome.stored = false;
                    if let FingerArrival::Remote(trail) = arrival {
                        outcome.teardown_trails.push(trail.clone());
                        if let Some(fh) = trail.first_hop() {
                            outcome.friend_decrements.push(fh);
                        }
                    }
                }
            }
            Some(mut existing) => {
                // Same identity: only trail-backed fingers can merge a
                // second parallel trail; self/friend re-arrivals are
                // idempotent no-ops.
                if let (FingerBacking::Trails(trails), FingerArrival::Remote(new_trail)) =
                    (&mut existing.backing, &arrival)
                {
                    if trails.iter().any(|t| t.hops == new_trail.hops) {
                        // duplicate hop sequence, drop silently.
                    } else if trails.len() < self.max_trails_per_finger {
                        trails.push(new_trail.clone());
                        outcome.stored = true;
                    } else if let Some((idx, longest_len)) = trails
                        .iter()
                        .enumerate()
                        .max_by_key(|(_, t)| t.length())
                        .map(|(i, t)| (i, t.length()))
                    {
                        if new_trail.length() < longest_len {
                            let evicted = trails.remove(idx);
                            outcome.teardown_trails.push(evicted.clone());
                            if let Some(fh) = evicted.first_hop() {
                                outcome.friend_decrements.push(fh);
                            }
                            trails.push(new_trail.clone());
                            outcome.stored = true;
                        }
                    }
                }
                self.slots[table_index] = Some(existing);
            }
        }

        if table_index == self.current_search_index {
            self.current_search_index = Self::decrement_index(self.current_search_index);
        }

        if table_index == 0 {
            if let Some(s) = &self.slots[0] {
                if s.identity != self.my_id {
                    outcome.verify_successor_needed = true;
                }
            }
        }

        outcome
    }

    fn install(
        &mut self,
        table_index: usize,
        identity: PeerId,
        arrival: FingerArrival,
        outcome: &mut FingerAddOutcome,
    ) {
        let backing = match arrival {
            FingerArrival::SelfId => FingerBacking::SelfId,
            FingerArrival::Friend => {
                outcome.friend_increment = Some(identity);
                FingerBacking::Friend
            }
            FingerArrival::Remote(trail) => FingerBacking::Trails(vec![trail]),
        };
        self.slots[table_index] = Some(Finger {
            identity,
            table_index,
            backing,
        });
        outcome.stored = true;
    }

    fn teardown_finger(&self, finger: Finger, outcome: &mut FingerAddOutcome) {
        match finger.backing {
            FingerBacking::SelfId => {}
            FingerBacking::Friend => {
                outcome.friend_decrement_single = Some(finger.identity);
            }
            FingerBacking::Trails(trails) => {
                for t in trails {
                    if let Some(fh) = t.first_hop() {
                        outcome.friend_decrements.push(fh);
                    }
                    outcome.teardown_trails.push(t);
                }
            }
        }
    }

    /// spec.md §4.3 `remove`: free the slot at `index`.
    pub fn remove(&mut self, index: usize) -> FingerAddOutcome {
        let mut outcome = FingerAddOutcome::default();
        if let Some(finger) = self.slots[index].take() {
            self.teardown_finger(finger, &mut outcome);
        }
        outcome
    }

    /// spec.md §4.3 `select_trail`: minimum-length trail whose first hop
    /// is not congested, tie-broken uniformly at random among equal
    /// minimum-length candidates (SPEC_FULL §4 item 2).
    pub fn select_trail<'a>(
        finger: &'a Finger,
        is_congested: impl Fn(&PeerId, Instant) -> bool,
        now: Instant,
    ) -> Option<&'a Trail> {
        let eligible: Vec<&Trail> = finger
            .trails()
            .iter()
            .filter(|t| match t.first_hop() {
                Some(fh) => !is_congested(&fh, now),
                None => false,
            })
            .collect();
        if eligible.is_empty() {
            return None;
        }
        let min_len = eligible.iter().map(|t| t.length()).min().unwrap();
        eligible
            .into_iter()
            .filter(|t| t.length() == min_len)
            .choose(&mut rand::thread_rng())
    }

    /// Removes every trail-backed finger whose *only* remaining trails
    /// began at `peer`; used on friend disconnect (spec.md §4.2).
    pub fn remove_fingers_solely_through(&mut self, peer: &PeerId) -> Vec<FingerAddOutcome> {
        let mut outcomes = Vec::new();
        for idx in 0..FINGER_COUNT {
            let should_remove = match &self.slots[idx] {
                Some(f) => match &f.backing {
                    FingerBacking::Friend => f.identity == *peer,
                    FingerBacking::Trails(trails) => {
                        !trails.is_empty()
                            && trails.iter().all(|t| t.first_hop().as_ref() == Some(peer))
                    }
                    FingerBacking::SelfId => false,
                },
                None => false,
            };
            if should_remove {
                outcomes.push(self.remove(idx));
            }
        }
        outcomes
    }

    /// Drops only the trails through `peer` from fingers that have *other*
    /// surviving trails, per spec.md §4.2 ("for fingers with only some
    /// trails starting here, send teardown on those trails, keep the
    /// finger"). Returns the dropped trails for teardown accounting.
    pub fn drop_partial_trails_through(&mut self, peer: &PeerId) -> Vec<Trail> {
        let mut dropped = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(f) = slot {
                if let FingerBacking::Trails(trails) = &mut f.backing {
                    if trails.iter().any(|t| t.first_hop().as_ref() == Some(peer))
                        && !trails.iter().all(|t| t.first_hop().as_ref() == Some(peer))
                    {
                        let (keep, drop): (Vec<_>, Vec<_>) = trails
                            .drain(..)
                            .partition(|t| t.first_hop().as_ref() != Some(peer));
                        *trails = keep;
                        dropped.extend(drop);
                    }
                }
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trail::TrailId;

    fn pid(seed: &[u8]) -> PeerId {
        PeerId::derive_for_test(seed)
    }

    #[test]
    fn friend_finger_has_no_trails() {
        let mut ft = FingerTable::new(pid(b"me"), 2);
        let friends = FriendTable::new();
        let out = ft.add(pid(b"a"), FingerArrival::Friend, 0, 0xFF, &friends);
        assert!(out.stored);
        assert_eq!(out.friend_increment, Some(pid(b"a")));
        assert!(ft.get(0).unwrap().trails().is_empty());
    }

    #[test]
    fn k_trails_cap_evicts_longest_when_new_is_shorter() {
        let mut ft = FingerTable::new(pid(b"me"), 2);
        let friends = FriendTable::new();
        let target = pid(b"target");
        let t_long = Trail::new(TrailId::random(), vec![pid(b"h1"), pid(b"h2"), pid(b"h3")]);
        let t_mid = Trail::new(TrailId::random(), vec![pid(b"h4"), pid(b"h5")]);
        ft.add(target, FingerArrival::Remote(t_long.clone()), 5, 0xFF, &friends);
        ft.add(target, FingerArrival::Remote(t_mid), 5, 0xFF, &friends);
        assert_eq!(ft.get(5).unwrap().trails().len(), 2);

        let t_short = Trail::new(TrailId::random(), vec![pid(b"h6")]);
        let out = ft.add(target, FingerArrival::Remote(t_short), 5, 0xFF, &friends);
        assert!(out.stored);
        assert_eq!(out.teardown_trails.len(), 1);
        assert_eq!(out.teardown_trails[0].hops, t_long.hops);
        assert_eq!(ft.get(5).unwrap().trails().len(), 2);
    }

    #[test]
    fn k_trails_cap_drops_new_when_not_shorter() {
        let mut ft = FingerTable::new(pid(b"me"), 1);
        let friends = FriendTable::new();
        let target = pid(b"target");
        let t1 = Trail::new(TrailId::random(), vec![pid(b"h1")]);
        ft.add(target, FingerArrival::Remote(t1), 5, 0xFF, &friends);
        let t2 = Trail::new(TrailId::random(), vec![pid(b"h2"), pid(b"h3")]);
        let out = ft.add(target, FingerArrival::Remote(t2), 5, 0xFF, &friends);
        assert!(!out.stored);
        assert!(out.teardown_trails.is_empty());
        assert_eq!(ft.get(5).unwrap().trails().len(), 1);
    }

    #[test]
    fn closer_candidate_displaces_existing_finger() {
        let mut ft = FingerTable::new(pid(b"me"), 2);
        let friends = FriendTable::new();
        // successor slot target is my_id+1; install two different remote
        // candidates and check the closer one wins.
        let far = PeerId::from_bytes({
            let mut b = [0u8; 64];
            b[0..8].copy_from_slice(&0x30u64.to_ne_bytes());
            b
        });
        let near = PeerId::from_bytes({
            let mut b = [0u8; 64];
            b[0..8].copy_from_slice(&0x20u64.to_ne_bytes());
            b
        });
        let target = 0x11u64;
        ft.add(
            far,
            FingerArrival::Remote(Trail::new(TrailId::random(), vec![pid(b"h1")])),
            0,
            target,
            &friends,
        );
        let out = ft.add(
            near,
            FingerArrival::Remote(Trail::new(TrailId::random(), vec![pid(b"h2")])),
            0,
            target,
            &friends,
        );
        assert!(out.stored);
        assert_eq!(ft.get(0).unwrap().identity, near);
    }

    #[test]
    fn search_pointer_wraps_from_zero_to_predecessor() {
        let mut ft = FingerTable::new(pid(b"me"), 2);
        let friends = FriendTable::new();
        assert_eq!(ft.current_search_index, 0);
        ft.add(pid(b"a"), FingerArrival::Friend, 0, 0xFF, &friends);
        assert_eq!(ft.current_search_index, PREDECESSOR_INDEX);
    }

    #[test]
    fn remove_friend_backed_finger_reports_single_decrement() {
        let mut ft = FingerTable::new(pid(b"me"), 2);
        let friends = FriendTable::new();
        ft.add(pid(b"a"), FingerArrival::Friend, 3, 0xFF, &friends);
        let out = ft.remove(3);
        assert_eq!(out.friend_decrement_single, Some(pid(b"a")));
        assert!(ft.get(3).is_none());
    }

    #[test]
    fn remote_trail_through_an_existing_friend_is_compressed() {
        let mut ft = FingerTable::new(pid(b"me"), 2);
        let mut friends = FriendTable::new();
        friends.on_connect(pid(b"h2"));
        let target = pid(b"target");
        let trail = Trail::new(TrailId::random(), vec![pid(b"h1"), pid(b"h2"), pid(b"h3")]);
        let out = ft.add(target, FingerArrival::Remote(trail), 5, 0xFF, &friends);
        let compression = out.compression.expect("h2 is already a friend");
        assert_eq!(compression.new_first_friend, pid(b"h2"));
        let stored = ft.get(5).unwrap().trails().first().unwrap();
        assert_eq!(stored.hops, vec![pid(b"h2"), pid(b"h3")]);
    }

    #[test]
    fn remote_trail_with_no_friend_hops_is_not_compressed() {
        let mut ft = FingerTable::new(pid(b"me"), 2);
        let friends = FriendTable::new();
        let target = pid(b"target");
        let trail = Trail::new(TrailId::random(), vec![pid(b"h1"), pid(b"h2")]);
        let out = ft.add(target, FingerArrival::Remote(trail), 5, 0xFF, &friends);
        assert!(out.compression.is_none());
    }
}
