// Copyright (c) 2026 Agoranet
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Canonical encoding and the 32-byte hash type used as the primary key
//! across every store in this crate.

use bincode::Options;
use ring::digest;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Canonical serialization error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("serialization")]
    Serialize,
    /// Deserialization failed.
    #[error("deserialization")]
    Deserialize,
    /// Decoded payload would exceed the configured size cap.
    #[error("size limit exceeded")]
    TooLarge,
}

/// Canonical bincode options (deterministic: fixed-width integers, no
/// trailing bytes). Every container reachable from a canonically-encoded
/// type must be a `BTreeMap`/`BTreeSet` (or a `Vec` already in a
/// deterministic order) or canonicalization is not guaranteed.
fn bincode_opts() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode with deterministic rules.
pub fn encode_canonical<T: Serialize>(v: &T) -> Result<Vec<u8>, CodecError> {
    bincode_opts()
        .serialize(v)
        .map_err(|_| CodecError::Serialize)
}

/// Decode with a hard size cap, enforced both on the raw wire bytes and
/// inside the deserializer (so a maliciously-crafted length prefix cannot
/// allocate past `max` before the outer check would otherwise catch it).
pub fn decode_canonical_limited<T: DeserializeOwned>(
    bytes: &[u8],
    max: usize,
) -> Result<T, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    bincode_opts()
        .with_limit(max as u64)
        .deserialize(bytes)
        .map_err(|_| CodecError::Deserialize)
}

/// 256-bit hash type, used as the primary key for every payload and
/// protected entry in the store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash32([u8; 32]);

impl Hash32 {
    /// Construct from raw bytes.
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encode, for logging and diagnostics.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// The first 8 bytes of a SHA-256 digest are already uniformly distributed;
// hashing only that slice avoids re-hashing all 32 bytes on every map probe.
impl std::hash::Hash for Hash32 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(&self.0[..8]);
    }
}

/// `SHA-256(canonicalEncoding(v))`.
pub fn hash32<T: Serialize>(v: &T) -> Result<Hash32, CodecError> {
    let bytes = encode_canonical(v)?;
    Ok(hash32_bytes(&bytes))
}

/// `SHA-256` over raw bytes, without a canonicalization step. Used for
/// append-only payloads which are already responsible for declaring their
/// own fixed-size content hash.
pub fn hash32_bytes(bytes: &[u8]) -> Hash32 {
    let d = digest::digest(&digest::SHA256, bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    Hash32(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_hash() {
        let a = hash32(&("listing", 1u64)).unwrap();
        let b = hash32(&("listing", 1u64)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_seqnr_different_hash() {
        let a = hash32(&("payload", 1u64)).unwrap();
        let b = hash32(&("payload", 2u64)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn decode_limited_rejects_oversize() {
        let bytes = encode_canonical(&vec![0u8; 128]).unwrap();
        let err = decode_canonical_limited::<Vec<u8>>(&bytes, 16).unwrap_err();
        assert!(matches!(err, CodecError::TooLarge));
    }

    #[test]
    fn hex_roundtrip_is_stable() {
        let h = hash32(&42u64).unwrap();
        assert_eq!(h.to_hex().len(), 64);
    }
}
