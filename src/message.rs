//! The wire protocol (spec.md §6). Each variant of [`OverlayMessage`]
//! corresponds to one row of the message table; [`codec`] frames them as
//! `{u16 size, u16 type}` + a bincode body, in the style of the teacher's
//! `MessageEnvelope` (`message.rs`) but without its onion-layer signing,
//! which belongs to the (external) cryptographic suite.

use crate::peer_id::PeerId;
use crate::routing_table::Direction;
use crate::trail::TrailId;
use serde::{Deserialize, Serialize};

/// Opaque content-addressed key, produced by the (external) block-type
/// module from a PUT's payload (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashKey(#[serde(with = "crate::wire_bytes::bytes_32")] [u8; 32]);

impl HashKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The 64-bit ring projection, same convention as `PeerId::value64`:
    /// leading 8 bytes, host-endian. Content is routed towards the peer
    /// closest to this value (spec.md §4.5).
    pub fn value64(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[0..8]);
        u64::from_ne_bytes(buf)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailSetup {
    pub is_predecessor: bool,
    pub destination_value: u64,
    pub source: PeerId,
    pub best_known_dest: PeerId,
    pub intermediate_trail_id: TrailId,
    pub trail_id: TrailId,
    pub hops: Vec<PeerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailSetupResult {
    pub finger: PeerId,
    pub querying: PeerId,
    pub is_predecessor: bool,
    pub destination_value: u64,
    pub trail_id: TrailId,
    pub hops: Vec<PeerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailRejection {
    pub source: PeerId,
    pub congested: PeerId,
    pub dest_value: u64,
    pub is_predecessor: bool,
    pub trail_id: TrailId,
    pub congestion_ns: u64,
    pub hops: Vec<PeerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailTeardown {
    pub trail_id: TrailId,
    pub direction: Direction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailCompression {
    pub source: PeerId,
    pub new_first_friend: PeerId,
    pub trail_id: TrailId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySuccessor {
    pub source: PeerId,
    pub successor: PeerId,
    pub trail_id: TrailId,
    pub trail: Vec<PeerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySuccessorResult {
    pub querying: PeerId,
    pub source_successor: PeerId,
    pub current_predecessor: PeerId,
    pub trail_id: TrailId,
    pub direction: Direction,
    pub trail: Vec<PeerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyNewSuccessor {
    pub source: PeerId,
    pub new_successor: PeerId,
    pub trail_id: TrailId,
    pub trail: Vec<PeerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTrail {
    pub source: PeerId,
    pub destination: PeerId,
    pub trail_id: TrailId,
    pub trail: Vec<PeerId>,
}

/// Bit flags carried on PUT/GET (spec.md §4.5 mentions route recording as
/// an optional behavior; modeled here as a flag rather than a bool so
/// further options don't require a wire-incompatible field addition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutOptions(pub u32);

impl PutOptions {
    pub const NONE: PutOptions = PutOptions(0);
    pub const RECORD_ROUTE: PutOptions = PutOptions(1 << 0);

    pub fn has(&self, flag: PutOptions) -> bool {
        self.0 & flag.0 != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Put {
    pub options: PutOptions,
    pub block_type: u32,
    pub hop_count: u32,
    pub replication: u32,
    pub best_known_dest: PeerId,
    pub intermediate_trail_id: TrailId,
    pub expiration_ns: u64,
    pub key: HashKey,
    pub put_path: Vec<PeerId>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Get {
    pub options: PutOptions,
    pub block_type: u32,
    pub hop_count: u32,
    pub replication: u32,
    pub best_known_dest: PeerId,
    pub intermediate_trail_id: TrailId,
    pub key: HashKey,
    pub get_path: Vec<PeerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResult {
    pub block_type: u32,
    pub querying: PeerId,
    pub expiration_ns: u64,
    pub key: HashKey,
    pub put_path: Vec<PeerId>,
    pub get_path: Vec<PeerId>,
    pub payload: Vec<u8>,
}

/// The tagged union of every message that can appear on a friend link.
/// Control-plane variants (everything but Put/Get/GetResult) drive only
/// the finger/routing tables, never the datastore (spec.md §2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OverlayMessage {
    TrailSetup(TrailSetup),
    TrailSetupResult(TrailSetupResult),
    TrailRejection(TrailRejection),
    TrailTeardown(TrailTeardown),
    TrailCompression(TrailCompression),
    VerifySuccessor(VerifySuccessor),
    VerifySuccessorResult(VerifySuccessorResult),
    NotifyNewSuccessor(NotifyNewSuccessor),
    AddTrail(AddTrail),
    Put(Put),
    Get(Get),
    GetResult(GetResult),
    ConnectionCreate { pid: u32 },
    ConnectionAck { pid: u32 },
    ConnectionDestroy,
    Keepalive,
    Poll { last_pid_recv: u32 },
}

impl OverlayMessage {
    /// The wire-format `type` discriminant (spec.md §6 header:
    /// `{u16 size, u16 type}`), stable across versions since it's used as
    /// the registration-table key (spec.md §9: "A registration table
    /// remains for wire-type → parser mapping").
    pub fn wire_type(&self) -> u16 {
        match self {
            OverlayMessage::TrailSetup(_) => 1,
            OverlayMessage::TrailSetupResult(_) => 2,
            OverlayMessage::TrailRejection(_) => 3,
            OverlayMessage::TrailTeardown(_) => 4,
            OverlayMessage::TrailCompression(_) => 5,
            OverlayMessage::VerifySuccessor(_) => 6,
            OverlayMessage::VerifySuccessorResult(_) => 7,
            OverlayMessage::NotifyNewSuccessor(_) => 8,
            OverlayMessage::AddTrail(_) => 9,
            OverlayMessage::Put(_) => 10,
            OverlayMessage::Get(_) => 11,
            OverlayMessage::GetResult(_) => 12,
            OverlayMessage::ConnectionCreate { .. } => 13,
            OverlayMessage::ConnectionAck { .. } => 14,
            OverlayMessage::ConnectionDestroy => 15,
            OverlayMessage::Keepalive => 16,
            OverlayMessage::Poll { .. } => 17,
        }
    }

    /// Is this control-plane traffic (drives finger/routing tables only),
    /// as opposed to PUT/GET/GET_RESULT (spec.md §2)?
    pub fn is_control_plane(&self) -> bool {
        !matches!(
            self,
            OverlayMessage::Put(_) | OverlayMessage::Get(_) | OverlayMessage::GetResult(_)
        )
    }

    /// spec.md §4.2: control messages (ACK, POLL, teardown) use importance
    /// >= 100. PUT/GET/GET_RESULT forwarding is best-effort, lower
    /// importance by default.
    pub fn default_importance(&self) -> u8 {
        match self {
            OverlayMessage::TrailTeardown(_)
            | OverlayMessage::ConnectionAck { .. }
            | OverlayMessage::Poll { .. }
            | OverlayMessage::Keepalive => 100,
            _ => 10,
        }
    }
}

/// A message the overlay core wants sent to a friend. Produced by the
/// trail/forwarding/stabilization logic, consumed by whatever enqueues it
/// onto [`crate::friend::FriendTable`] and hands it to the transport.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: PeerId,
    pub message: OverlayMessage,
}

impl Outbound {
    pub fn new(to: PeerId, message: OverlayMessage) -> Self {
        Self { to, message }
    }

    pub fn importance(&self) -> u8 {
        self.message.default_importance()
    }
}

pub mod codec {
    use super::OverlayMessage;
    use crate::error::CodecError;

    const HEADER_LEN: usize = 4;

    /// Encodes a message as `{u16 size}{u16 type}{bincode body}`. `size`
    /// covers the whole frame including the header, matching spec.md §6's
    /// "every message begins with {u16 size, u16 type}".
    pub fn encode(msg: &OverlayMessage) -> Result<Vec<u8>, CodecError> {
        let body = bincode::serialize(msg)?;
        let total_len = HEADER_LEN + body.len();
        if total_len > u16::MAX as usize {
            return Err(CodecError::SizeMismatch {
                declared: u16::MAX,
                actual: total_len,
            });
        }
        let mut out = Vec::with_capacity(total_len);
        out.extend_from_slice(&(total_len as u16).to_be_bytes());
        out.extend_from_slice(&msg.wire_type().to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decodes a framed message, validating the declared size against the
    /// actual buffer length before touching the body (spec.md §7:
    /// malformed messages are "dropped silently, accounted as a
    /// statistic").
    pub fn decode(bytes: &[u8]) -> Result<OverlayMessage, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::TooShort {
                need: HEADER_LEN,
                have: bytes.len(),
            });
        }
        let declared = u16::from_be_bytes([bytes[0], bytes[1]]);
        if declared as usize != bytes.len() {
            return Err(CodecError::SizeMismatch {
                declared,
                actual: bytes.len(),
            });
        }
        let wire_type = u16::from_be_bytes([bytes[2], bytes[3]]);
        let body = &bytes[HEADER_LEN..];
        let msg: OverlayMessage = bincode::deserialize(body)?;
        if msg.wire_type() != wire_type {
            return Err(CodecError::UnknownType(wire_type));
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trail_teardown_round_trips() {
        let msg = OverlayMessage::TrailTeardown(TrailTeardown {
            trail_id: TrailId::random(),
            direction: Direction::SrcToDest,
        });
        let encoded = codec::encode(&msg).unwrap();
        let decoded = codec::decode(&encoded).unwrap();
        match decoded {
            OverlayMessage::TrailTeardown(t) => assert_eq!(t.direction, Direction::SrcToDest),
            other => panic!("wrong variant decoded: {:?}", other),
        }
    }

    #[test]
    fn rejects_size_mismatch() {
        let msg = OverlayMessage::Keepalive;
        let mut encoded = codec::encode(&msg).unwrap();
        encoded.truncate(encoded.len() - 1);
        assert!(matches!(
            codec::decode(&encoded),
            Err(CodecError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn put_options_flags() {
        let opts = PutOptions::RECORD_ROUTE;
        assert!(opts.has(PutOptions::RECORD_ROUTE));
        assert!(!PutOptions::NONE.has(PutOptions::RECORD_ROUTE));
    }
}
