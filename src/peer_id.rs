//! 512-bit peer identifiers and Chord ring arithmetic over their 64-bit
//! projection.
//!
//! The overlay never computes its own hashes — `PeerId` is produced by the
//! (external, spec.md §1(a)) peer-id hashing primitive and handed in whole.
//! Everything the ring needs — successor/predecessor comparisons, finger
//! targets — operates on [`PeerId::value64`], the leading 8 bytes
//! interpreted host-endian, per spec.md §3.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 512-bit peer identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(#[serde(with = "crate::wire_bytes")] [u8; 64]);

impl PeerId {
    pub const LEN: usize = 64;

    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Test/bench fixture helper: derive a PeerId by hashing arbitrary bytes
    /// with blake3, expanded to 512 bits via the XOF. Production callers get
    /// PeerIds from the external hashing primitive (spec.md §1(a)), never
    /// from here.
    pub fn derive_for_test(seed: &[u8]) -> Self {
        let mut out = [0u8; 64];
        let mut xof = blake3::Hasher::new().update(seed).finalize_xof();
        xof.fill(&mut out);
        Self(out)
    }

    pub fn random_for_test() -> Self {
        let mut out = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut out);
        Self(out)
    }

    /// The 64-bit ring projection: the leading 8 bytes, host-endian.
    pub fn value64(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[0..8]);
        u64::from_ne_bytes(buf)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Base32 Crockford, canonical textual encoding per spec.md §9
        // ("Enc" name confusions): truncated to the first 10 encoded
        // characters (~50 bits) for log readability.
        let encoded = base32_crockford(&self.0);
        write!(f, "{}", &encoded[..encoded.len().min(10)])
    }
}

const CROCKFORD_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

fn base32_crockford(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8 + 4) / 5);
    let mut buffer: u32 = 0;
    let mut bits_in_buffer = 0u32;
    for &b in bytes {
        buffer = (buffer << 8) | b as u32;
        bits_in_buffer += 8;
        while bits_in_buffer >= 5 {
            bits_in_buffer -= 5;
            let idx = (buffer >> bits_in_buffer) & 0x1f;
            out.push(CROCKFORD_ALPHABET[idx as usize] as char);
        }
    }
    if bits_in_buffer > 0 {
        let idx = (buffer << (5 - bits_in_buffer)) & 0x1f;
        out.push(CROCKFORD_ALPHABET[idx as usize] as char);
    }
    out
}

/// Total index into the finger table: 0..=63 are successor fingers, 64 is
/// the predecessor.
pub const FINGER_COUNT: usize = 65;
pub const PREDECESSOR_INDEX: usize = 64;

/// The target ring value for finger-table slot `index` given this node's
/// own 64-bit projection. Slots 0..=63: `my_id64 + 2^index`. Slot 64
/// (predecessor): `my_id64 - 1`.
pub fn finger_target(my_id64: u64, index: usize) -> u64 {
    if index == PREDECESSOR_INDEX {
        my_id64.wrapping_sub(1)
    } else {
        my_id64.wrapping_add(1u64 << index)
    }
}

/// Forward ring distance from `target` to `x`: how far one must walk
/// forward (increasing) from `target` to reach `x`. Used to find the
/// candidate nearest *at or after* `target` (a successor-style lookup).
fn forward_gap(x: u64, target: u64) -> u64 {
    x.wrapping_sub(target)
}

/// Backward ring distance from `target` to `x`: how far one must walk
/// backward (decreasing) from `target` to reach `x`. Used to find the
/// candidate nearest *at or before* `target` (a predecessor-style lookup).
fn backward_gap(x: u64, target: u64) -> u64 {
    target.wrapping_sub(x)
}

/// Returns whichever of `a`, `b` is closest to `target`, walking forward
/// (successor-style): the candidate that is closest to, but not short of,
/// `target`. Used by every finger-table index except the predecessor slot.
/// Total over `Z/2^64`, handles wrap-around.
pub fn closest_finger(a: u64, b: u64, target: u64) -> u64 {
    if a == target {
        return a;
    }
    if b == target {
        return b;
    }
    if forward_gap(a, target) <= forward_gap(b, target) {
        a
    } else {
        b
    }
}

/// Returns whichever of `a`, `b` is closest to `target`, walking backward
/// (predecessor-style). Used only by the predecessor slot (index 64).
/// Total over `Z/2^64`, handles wrap-around.
pub fn closest_predecessor(a: u64, b: u64, target: u64) -> u64 {
    if a == target {
        return a;
    }
    if b == target {
        return b;
    }
    if backward_gap(a, target) <= backward_gap(b, target) {
        a
    } else {
        b
    }
}

/// Dispatches to [`closest_finger`] or [`closest_predecessor`] based on
/// `is_predecessor`, the shape every call site in the trail engine needs.
pub fn closest_peer(a: u64, b: u64, target: u64, is_predecessor: bool) -> u64 {
    if is_predecessor {
        closest_predecessor(a, b, target)
    } else {
        closest_finger(a, b, target)
    }
}
