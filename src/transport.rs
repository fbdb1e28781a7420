//! The external collaborator boundary for sending bytes to a friend
//! (spec.md §1(b)): "point-to-point reliable datagram send with a bounded
//! send queue per peer." The overlay core never opens a socket itself —
//! it drives this trait, the same separation the teacher draws between
//! its DHT logic and `NetworkManager` (`p2p.rs`).

use crate::peer_id::PeerId;
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The peer is not currently reachable; the overlay treats this the
    /// same as a friend disconnect.
    Unreachable,
    /// The underlying transport's own queue rejected the send.
    QueueFull,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unreachable => write!(f, "peer unreachable"),
            TransportError::QueueFull => write!(f, "transport queue full"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A single already-encoded frame, handed to the transport in FIFO order
/// per friend. The transport owns retransmission and congestion control
/// below this line; the overlay only owns which frame goes out next
/// (spec.md §4.2).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `frame` to `peer`. Must not block the caller's event loop;
    /// implementations that need to block should hand off internally.
    async fn send(&self, peer: PeerId, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Best-effort signal of whether `peer` is currently connected. Used
    /// only for diagnostics — the source of truth for friend liveness is
    /// the CONNECTION_BROKEN event the transport delivers separately.
    fn is_connected(&self, peer: PeerId) -> bool;
}
