//! Per-friend connection state machine and PID-based flow control
//! (spec.md §4.6). One [`Connection`] exists per friend link, independent
//! of the trails and fingers that ride over it.

use crate::error::OverlayError;
use crate::peer_id::PeerId;
use crate::routing_table::Direction;
use std::time::{Duration, Instant};
use tracing::trace;

/// spec.md §4.6: `NEW -> SENT -> ACK -> READY`, with `DESTROY` reachable
/// from any state once the link is confirmed gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Sent,
    Ack,
    Ready,
    Destroy,
}

/// Is `a` at least as new as `b` in the circular PID space? Comparison is
/// `(a - b) mod 2^32 < 2^31`, matching spec.md §4.6's wrap-safe ordering.
fn pid_at_least(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) < (1u32 << 31)
}

fn pid_strictly_newer(a: u32, b: u32) -> bool {
    a != b && pid_at_least(a, b)
}

const MIN_POLL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(60);

/// One friend's connection-layer bookkeeping: handshake state, PID flow
/// control, and POLL backoff. Message routing (finger/trail tables) is
/// layered on top of this, not inside it.
#[derive(Debug)]
pub struct Connection {
    pub peer: PeerId,
    pub state: ConnectionState,
    next_pid: u32,
    last_pid_sent: u32,
    last_pid_recv: Option<u32>,
    last_ack_sent: u32,
    last_ack_recv: u32,
    pub queue_n: u32,
    pub queue_max: u32,
    last_activity: Instant,
    poll_backoff: Duration,
}

impl Connection {
    pub fn new(peer: PeerId, queue_max: u32, now: Instant) -> Self {
        Self {
            peer,
            state: ConnectionState::New,
            next_pid: 0,
            last_pid_sent: 0,
            last_pid_recv: None,
            last_ack_sent: 0,
            last_ack_recv: 0,
            queue_n: 0,
            queue_max,
            last_activity: now,
            poll_backoff: MIN_POLL_BACKOFF,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn on_create_sent(&mut self) {
        if self.state == ConnectionState::New {
            self.state = ConnectionState::Sent;
        }
    }

    pub fn on_ack_received(&mut self, now: Instant) {
        if matches!(self.state, ConnectionState::Sent | ConnectionState::New) {
            self.state = ConnectionState::Ack;
        }
        self.last_activity = now;
    }

    /// First data (or keepalive) exchanged after ACK promotes the
    /// connection to READY, at which point it's eligible to carry trails.
    pub fn on_ready(&mut self, now: Instant) {
        if self.state == ConnectionState::Ack {
            self.state = ConnectionState::Ready;
        }
        self.last_activity = now;
    }

    pub fn on_destroyed(&mut self) {
        self.state = ConnectionState::Destroy;
    }

    /// Allocates the PID for the next outbound message on this link.
    pub fn next_outbound_pid(&mut self) -> u32 {
        let pid = self.next_pid;
        self.next_pid = self.next_pid.wrapping_add(1);
        self.last_pid_sent = pid;
        pid
    }

    /// Accepts (or rejects) an inbound message's PID, per spec.md §4.6's
    /// flow-control rule: strictly newer than the last accepted PID, else
    /// it's a duplicate or a stale replay.
    pub fn accept_inbound_pid(&mut self, pid: u32, now: Instant) -> Result<(), OverlayError> {
        match self.last_pid_recv {
            None => {
                self.last_pid_recv = Some(pid);
                self.last_activity = now;
                Ok(())
            }
            Some(last) if pid_strictly_newer(pid, last) => {
                self.last_pid_recv = Some(pid);
                self.last_activity = now;
                Ok(())
            }
            Some(last) if pid == last => Err(OverlayError::DuplicatePid {
                pid,
                direction: Direction::SrcToDest,
            }),
            Some(last) => Err(OverlayError::StalePid {
                pid,
                last_accepted: last,
            }),
        }
    }

    pub fn record_ack_sent(&mut self, pid: u32) {
        self.last_ack_sent = pid;
    }

    pub fn record_ack_received(&mut self, pid: u32, now: Instant) {
        if pid_at_least(pid, self.last_ack_recv) {
            self.last_ack_recv = pid;
        }
        self.last_activity = now;
    }

    /// True once the peer's ACK stream has caught up with everything this
    /// side has sent (used to decide whether a keepalive is still owed).
    pub fn is_fully_acked(&self) -> bool {
        self.last_ack_recv == self.last_pid_sent
    }

    /// spec.md §4.6: keepalives fire after `refresh_connection_time` of
    /// silence; a link with no traffic at all is still alive until then.
    pub fn needs_keepalive(&self, now: Instant, refresh_connection_time: Duration) -> bool {
        now.duration_since(self.last_activity) >= refresh_connection_time
    }

    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Exponential POLL backoff, reset by any real activity, capped at
    /// [`MAX_POLL_BACKOFF`] (spec.md §4.6: "POLL messages for lost ACKs
    /// use an exponential backoff").
    pub fn on_poll_sent(&mut self, now: Instant) -> Duration {
        let current = self.poll_backoff;
        self.poll_backoff = (self.poll_backoff * 2).min(MAX_POLL_BACKOFF);
        trace!(peer = %self.peer, backoff_ms = current.as_millis() as u64, "poll sent");
        self.last_activity = now;
        current
    }

    pub fn reset_poll_backoff(&mut self) {
        self.poll_backoff = MIN_POLL_BACKOFF;
    }

    pub fn queue_has_room(&self) -> bool {
        self.queue_n < self.queue_max
    }
}
