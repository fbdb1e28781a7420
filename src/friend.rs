//! Friends: peers this node holds a direct link-layer session with
//! (spec.md §4.2).

use crate::config::Config;
use crate::peer_id::PeerId;
use crate::trail::TrailId;
use rand::seq::IteratorRandom;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// A message queued for a friend, pending transmission by the (external)
/// transport collaborator.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub importance: u8,
    pub deadline: Instant,
    pub bytes: Vec<u8>,
    /// Present for control messages, used for at-most-one displacement of
    /// an identical in-flight control message (spec.md §4.2).
    pub tag: Option<PendingTag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTag {
    pub wire_type: u16,
    pub trail_id: Option<TrailId>,
}

/// Importance threshold at and above which a message is "control plane"
/// (ACK, POLL, teardown) per spec.md §4.2.
pub const CONTROL_IMPORTANCE: u8 = 100;

/// A direct neighbor.
#[derive(Debug)]
pub struct Friend {
    pub id: PeerId,
    pub trails_count: u32,
    pub congestion_until: Option<Instant>,
    pub pending_count: u32,
    send_queue: VecDeque<PendingMessage>,
}

impl Friend {
    fn new(id: PeerId) -> Self {
        Self {
            id,
            trails_count: 0,
            congestion_until: None,
            pending_count: 0,
            send_queue: VecDeque::new(),
        }
    }

    pub fn is_congested(&self, now: Instant) -> bool {
        match self.congestion_until {
            Some(until) => now < until,
            None => false,
        }
    }

    pub fn is_over_trail_threshold(&self, threshold: u32) -> bool {
        self.trails_count >= threshold
    }

    /// Pops the next non-expired message for transport to send, dropping
    /// (and accounting for, via the caller) any expired messages found
    /// ahead of it in FIFO order.
    pub fn pop_next(&mut self, now: Instant) -> (Option<PendingMessage>, u32) {
        let mut expired = 0;
        while let Some(front) = self.send_queue.front() {
            if front.deadline <= now {
                self.send_queue.pop_front();
                expired += 1;
                continue;
            }
            break;
        }
        let msg = self.send_queue.pop_front();
        if msg.is_some() {
            self.pending_count = self.pending_count.saturating_sub(1);
        }
        (msg, expired)
    }

    pub fn queue_len(&self) -> usize {
        self.send_queue.len()
    }

    fn enqueue(&mut self, msg: PendingMessage, queue_max: u32) -> EnqueueOutcome {
        if msg.importance >= CONTROL_IMPORTANCE {
            if let Some(tag) = msg.tag {
                if let Some(pos) = self
                    .send_queue
                    .iter()
                    .position(|m| m.importance >= CONTROL_IMPORTANCE && m.tag == Some(tag))
                {
                    self.send_queue.remove(pos);
                    self.pending_count = self.pending_count.saturating_sub(1);
                }
            }
            self.send_queue.push_back(msg);
            self.pending_count += 1;
            return EnqueueOutcome::Accepted;
        }

        if self.send_queue.len() as u32 >= queue_max {
            return EnqueueOutcome::DroppedQueueFull;
        }
        self.send_queue.push_back(msg);
        self.pending_count += 1;
        EnqueueOutcome::Accepted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    DroppedQueueFull,
}

/// All direct neighbors of this node.
#[derive(Debug, Default)]
pub struct FriendTable {
    friends: HashMap<PeerId, Friend>,
}

impl FriendTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.friends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.friends.is_empty()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.friends.contains_key(peer)
    }

    pub fn get(&self, peer: &PeerId) -> Option<&Friend> {
        self.friends.get(peer)
    }

    pub fn get_mut(&mut self, peer: &PeerId) -> Option<&mut Friend> {
        self.friends.get_mut(peer)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Friend> {
        self.friends.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.friends.keys().copied()
    }

    /// Returns `true` if this is the first-ever friend (caller starts the
    /// periodic find-finger task on this transition, spec.md §4.2).
    pub fn on_connect(&mut self, peer: PeerId) -> bool {
        let was_empty = self.friends.is_empty();
        self.friends.entry(peer).or_insert_with(|| Friend::new(peer));
        debug!(peer = %peer, "friend connected");
        was_empty
    }

    /// Removes the friend record. Cascading routing/finger cleanup is the
    /// caller's (Overlay's) responsibility, since it spans other tables.
    pub fn on_disconnect(&mut self, peer: &PeerId) -> Option<Friend> {
        let removed = self.friends.remove(peer);
        if removed.is_some() {
            debug!(peer = %peer, "friend disconnected");
        }
        removed
    }

    pub fn enqueue(
        &mut self,
        peer: &PeerId,
        bytes: Vec<u8>,
        importance: u8,
        deadline: Instant,
        tag: Option<PendingTag>,
        config: &Config,
    ) -> Option<EnqueueOutcome> {
        let queue_max = config.per_friend_queue_max();
        let friend = self.friends.get_mut(peer)?;
        let outcome = friend.enqueue(
            PendingMessage {
                importance,
                deadline,
                bytes,
                tag,
            },
            queue_max,
        );
        if outcome == EnqueueOutcome::DroppedQueueFull {
            warn!(peer = %peer, "friend send queue full, dropping message");
        }
        Some(outcome)
    }

    pub fn mark_congested(&mut self, peer: &PeerId, until: Instant) {
        if let Some(f) = self.friends.get_mut(peer) {
            f.congestion_until = Some(until);
            trace!(peer = %peer, "marked congested");
        }
    }

    pub fn increment_trails(&mut self, peer: &PeerId) {
        if let Some(f) = self.friends.get_mut(peer) {
            f.trails_count += 1;
        }
    }

    pub fn decrement_trails(&mut self, peer: &PeerId) {
        if let Some(f) = self.friends.get_mut(peer) {
            f.trails_count = f.trails_count.saturating_sub(1);
        }
    }

    /// Uniformly random friend with `trails_count < threshold` and not
    /// currently congested. `None` if every friend is congested or over
    /// threshold (spec.md §4.2).
    pub fn pick_random_non_congested(
        &self,
        threshold: u32,
        now: Instant,
    ) -> Option<PeerId> {
        self.friends
            .values()
            .filter(|f| !f.is_over_trail_threshold(threshold) && !f.is_congested(now))
            .map(|f| f.id)
            .choose(&mut rand::thread_rng())
    }

    pub fn exclude_and_pick_random_non_congested(
        &self,
        threshold: u32,
        now: Instant,
        exclude: &PeerId,
    ) -> Option<PeerId> {
        self.friends
            .values()
            .filter(|f| {
                f.id != *exclude && !f.is_over_trail_threshold(threshold) && !f.is_congested(now)
            })
            .map(|f| f.id)
            .choose(&mut rand::thread_rng())
    }

    /// Default congestion window applied when a rejection doesn't carry
    /// its own (SPEC_FULL §4 item 6 prefers the carried value when given).
    pub fn mark_congested_default(&mut self, peer: &PeerId, now: Instant, default: Duration) {
        self.mark_congested(peer, now + default);
    }
}
