//! Typed error surfaces for the overlay core.
//!
//! The overlay never surfaces reachability problems to upper layers
//! (spec.md §7: "the core never returns errors to upper layers for
//! reachability problems"). These enums exist for the statistics layer and
//! for hard invariant violations, not for routine DHT misses.

use crate::peer_id::PeerId;
use crate::trail::TrailId;
use thiserror::Error;

/// Reasons a message is dropped or a trail operation fails, mirroring
/// spec.md §7's error kinds. None of these propagate to the application;
/// each has a matching counter in [`crate::metrics::Stats`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OverlayError {
    /// A directly-connected peer was lost.
    #[error("link down: {peer}")]
    LinkDown { peer: PeerId },

    /// Routing-table capacity exhausted on an intermediate peer.
    #[error("trail table full, rejecting trail {trail_id}")]
    TrailFull { trail_id: TrailId },

    /// A downstream link on a trail was discovered to be down.
    #[error("trail {trail_id} broken at hop")]
    TrailBroken { trail_id: TrailId },

    /// A trail_id already exists with a different (prev_hop, next_hop)
    /// pair — a replayed or duplicated setup (SPEC_FULL §4, item 1).
    #[error("trail {trail_id} conflicts with an existing routing entry")]
    TrailConflict { trail_id: TrailId },

    /// A peer would appear twice on the same trail (spec.md §9).
    #[error("peer {peer} already present on trail {trail_id}")]
    SelfOnTrail { peer: PeerId, trail_id: TrailId },

    /// Message size/field inconsistent with its declared type.
    #[error("malformed message: {reason}")]
    Malformed { reason: String },

    /// A message with this PID was already seen on this connection.
    #[error("duplicate pid {pid} on direction {direction:?}")]
    DuplicatePid {
        pid: u32,
        direction: crate::routing_table::Direction,
    },

    /// A message's PID is older than the last accepted PID.
    #[error("stale pid {pid}, last accepted {last_accepted}")]
    StalePid { pid: u32, last_accepted: u32 },

    /// A message's deadline elapsed while queued.
    #[error("message deadline expired")]
    Deadline,

    /// No non-congested friend was available to route through.
    #[error("no non-congested friend available")]
    AllFriendsCongested,
}

/// Errors from decoding/encoding the wire format (spec.md §6).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message too short: need at least {need} bytes, have {have}")]
    TooShort { need: usize, have: usize },

    #[error("declared size {declared} does not match frame length {actual}")]
    SizeMismatch { declared: u16, actual: usize },

    #[error("unknown wire type {0}")]
    UnknownType(u16),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}
