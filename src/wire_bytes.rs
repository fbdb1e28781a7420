//! Shared serde helper for fixed 64-byte identifiers (`PeerId`, `TrailId`).

use serde::de::Error;
use serde::{Deserializer, Serializer};

pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_bytes(bytes)
}

pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
    let v: Vec<u8> = serde::Deserialize::deserialize(d)?;
    if v.len() != 64 {
        return Err(D::Error::custom("expected 64 bytes"));
    }
    let mut out = [0u8; 64];
    out.copy_from_slice(&v);
    Ok(out)
}

/// Same helper, for the 32-byte hash keys used in PUT/GET/GET_RESULT.
pub mod bytes_32 {
    use serde::de::Error;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let v: Vec<u8> = serde::Deserialize::deserialize(d)?;
        if v.len() != 32 {
            return Err(D::Error::custom("expected 32 bytes"));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&v);
        Ok(out)
    }
}
