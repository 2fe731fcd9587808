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

//! Domain-separated signing bytes for protected-entry operations, and
//! Ed25519 sign/verify helpers.
//!
//! A signature minted for one message class (add, remove, mailbox-remove)
//! can never be replayed as a valid signature for another class, because
//! each signing-bytes function prepends a distinct domain tag before the
//! hash it actually covers.

use crate::core::crypto::hash::{CodecError, Hash32};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signing/verification error.
#[derive(Debug, Error)]
pub enum SigningError {
    /// Canonical encoding of the signed tuple failed.
    #[error("codec")]
    Codec,
    /// Public key bytes are not a well-formed Ed25519 key (32 bytes).
    #[error("malformed public key")]
    MalformedKey,
    /// Signature did not verify.
    #[error("bad signature")]
    BadSignature,
}

impl From<CodecError> for SigningError {
    fn from(_: CodecError) -> Self {
        SigningError::Codec
    }
}

/// Ed25519 public key bytes (32 bytes), used pervasively as an owner
/// identity across protected entries.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerPubKey(pub [u8; 32]);

impl OwnerPubKey {
    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim()).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Some(Self(out))
    }

    /// Hex-encode.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Ed25519 signature bytes (64 bytes).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

const DOMAIN_ENTRY: &[u8] = b"Agoranet-Entry-Sig-v1";
const DOMAIN_REMOVE: &[u8] = b"Agoranet-Remove-Sig-v1";
const DOMAIN_MAILBOX_REMOVE: &[u8] = b"Agoranet-Mailbox-Remove-Sig-v1";

fn domain_digest(domain: &'static [u8], payload_hash: Hash32, seq_nr: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(domain.len() + 32 + 8);
    out.extend_from_slice(domain);
    out.extend_from_slice(payload_hash.as_bytes());
    out.extend_from_slice(&seq_nr.to_be_bytes());
    out
}

/// Signing bytes for adding or refreshing a protected entry:
/// `domain || hash32(payload) || sequenceNumber`.
///
/// A refresh reuses this same digest (over the *new* sequence number)
/// rather than a separate domain, so the rebuilt entry's signature stays
/// independently verifiable under the ordinary add validator when the
/// entry is later redistributed to other peers in a get-data response.
pub fn entry_signing_bytes(payload_hash: Hash32, seq_nr: u64) -> Vec<u8> {
    domain_digest(DOMAIN_ENTRY, payload_hash, seq_nr)
}

/// Signing bytes for an owner-issued remove.
pub fn remove_signing_bytes(payload_hash: Hash32, seq_nr: u64) -> Vec<u8> {
    domain_digest(DOMAIN_REMOVE, payload_hash, seq_nr)
}

/// Signing bytes for a receiver-issued mailbox remove.
pub fn mailbox_remove_signing_bytes(payload_hash: Hash32, seq_nr: u64) -> Vec<u8> {
    domain_digest(DOMAIN_MAILBOX_REMOVE, payload_hash, seq_nr)
}

/// Verify a signature given raw Ed25519 public key bytes.
pub fn verify(pk: &OwnerPubKey, msg: &[u8], sig: &Signature) -> Result<(), SigningError> {
    if sig.0.len() != 64 {
        return Err(SigningError::BadSignature);
    }
    let unparsed = UnparsedPublicKey::new(&ED25519, &pk.0);
    unparsed
        .verify(msg, &sig.0)
        .map_err(|_| SigningError::BadSignature)
}

/// An in-process Ed25519 signer, used for entries this node originates
/// itself (e.g. mailbox replies) rather than merely relaying.
pub struct LocalSigner {
    keypair: Ed25519KeyPair,
}

impl LocalSigner {
    /// Build a signer from PKCS#8 key bytes.
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, SigningError> {
        let keypair = Ed25519KeyPair::from_pkcs8(pkcs8).map_err(|_| SigningError::MalformedKey)?;
        Ok(Self { keypair })
    }

    /// This signer's public key.
    pub fn public_key(&self) -> OwnerPubKey {
        let pk = self.keypair.public_key().as_ref();
        let mut out = [0u8; 32];
        out.copy_from_slice(pk);
        OwnerPubKey(out)
    }

    /// Sign arbitrary message bytes.
    pub fn sign(&self, msg: &[u8]) -> Signature {
        Signature(self.keypair.sign(msg).as_ref().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;

    fn test_signer() -> LocalSigner {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        LocalSigner::from_pkcs8(pkcs8.as_ref()).unwrap()
    }

    #[test]
    fn sign_then_verify_roundtrips() {
        let signer = test_signer();
        let h = Hash32::from_bytes([7u8; 32]);
        let msg = entry_signing_bytes(h, 3);
        let sig = signer.sign(&msg);
        verify(&signer.public_key(), &msg, &sig).unwrap();
    }

    #[test]
    fn different_domains_do_not_cross_verify() {
        let signer = test_signer();
        let h = Hash32::from_bytes([1u8; 32]);
        let add_msg = entry_signing_bytes(h, 1);
        let remove_msg = remove_signing_bytes(h, 1);
        let sig = signer.sign(&add_msg);
        // A signature minted over the add-domain bytes must not verify
        // against the structurally similar remove-domain bytes.
        assert!(verify(&signer.public_key(), &remove_msg, &sig).is_err());
    }
}
