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

//! Wire message types exchanged between peers: entries, add/remove/refresh
//! envelopes, and the get-data request/response pair.

use crate::core::crypto::hash::Hash32;
use crate::core::crypto::signing::{OwnerPubKey, Signature};
use crate::core::payload::{AppendOnlyPayload, ProtectedPayload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A signed, owner-authored protected entry, not addressed to a specific
/// receiver.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtectedStorageEntry {
    /// Entry contents.
    pub payload: ProtectedPayload,
    /// Owner identity; signatures verify against this key.
    pub owner_pub_key: OwnerPubKey,
    /// Anti-replay counter; an incoming entry is only accepted if this is
    /// strictly greater than the sequence number on file for its hash.
    pub sequence_number: u64,
    /// Wall-clock time this entry was (re)added, ms since Unix epoch.
    pub created_at_ms: u64,
    /// Remaining time-to-live from `created_at_ms`. Can be halved
    /// ("back-dated") on an unintended owner disconnect.
    pub ttl_ms: u64,
    /// Covers `entry_signing_bytes(hash32(payload, sequence_number),
    /// sequence_number)`.
    pub signature: Signature,
}

/// A protected entry additionally addressed to a specific receiver. Only
/// that receiver (not the original owner) may remove it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtectedMailboxEntry {
    /// The underlying signed entry. `owner_pub_key` here is the sender.
    pub entry: ProtectedStorageEntry,
    /// The intended recipient; mailbox removes must be signed by this key.
    pub receiver_pub_key: OwnerPubKey,
}

/// Either flavor of protected entry, as carried on the wire and in the
/// store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum StorageEntry {
    /// See [`ProtectedStorageEntry`].
    Regular(ProtectedStorageEntry),
    /// See [`ProtectedMailboxEntry`].
    Mailbox(ProtectedMailboxEntry),
}

impl StorageEntry {
    /// The entry's own payload, regardless of wrapper.
    pub fn payload(&self) -> &ProtectedPayload {
        match self {
            StorageEntry::Regular(e) => &e.payload,
            StorageEntry::Mailbox(m) => &m.entry.payload,
        }
    }

    /// The sequence number carried by this entry.
    pub fn sequence_number(&self) -> u64 {
        match self {
            StorageEntry::Regular(e) => e.sequence_number,
            StorageEntry::Mailbox(m) => m.entry.sequence_number,
        }
    }

    /// The creation timestamp carried by this entry.
    pub fn created_at_ms(&self) -> u64 {
        match self {
            StorageEntry::Regular(e) => e.created_at_ms,
            StorageEntry::Mailbox(m) => m.entry.created_at_ms,
        }
    }

    /// The remaining TTL carried by this entry.
    pub fn ttl_ms(&self) -> u64 {
        match self {
            StorageEntry::Regular(e) => e.ttl_ms,
            StorageEntry::Mailbox(m) => m.entry.ttl_ms,
        }
    }

    /// Halve the remaining TTL (back-dating on unintended disconnect).
    pub fn back_date(&mut self) {
        match self {
            StorageEntry::Regular(e) => e.ttl_ms /= 2,
            StorageEntry::Mailbox(m) => m.entry.ttl_ms /= 2,
        }
    }

    /// The signature covering the add/refresh digest.
    pub fn signature(&self) -> &Signature {
        match self {
            StorageEntry::Regular(e) => &e.signature,
            StorageEntry::Mailbox(m) => &m.entry.signature,
        }
    }

    /// The key whose signature authorized the *add*: the sender for both
    /// variants (mailbox removes are authorized by the receiver instead,
    /// handled separately in `RemoveMailboxDataMessage`).
    pub fn owner_pub_key(&self) -> &OwnerPubKey {
        match self {
            StorageEntry::Regular(e) => &e.owner_pub_key,
            StorageEntry::Mailbox(m) => &m.entry.owner_pub_key,
        }
    }
}

/// An append-only entry: content-addressed, self-verifying.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppendOnlyEntry {
    /// Entry contents.
    pub payload: AppendOnlyPayload,
    /// The hash this entry claims to live at; ingest recomputes
    /// `hash32(&payload)` and rejects on mismatch.
    pub declared_hash: Hash32,
}

/// Broadcast of a new protected entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddDataMessage {
    /// The entry being added.
    pub entry: StorageEntry,
}

/// Broadcast of a refreshed TTL for an existing protected entry. Carries
/// no payload; the receiving node must already hold the hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshOfferMessage {
    /// Hash of the payload being refreshed.
    pub hash: Hash32,
    /// Owner identity; must match the stored entry's owner.
    pub owner_pub_key: OwnerPubKey,
    /// New sequence number; must be strictly greater than the one on file.
    pub new_sequence_number: u64,
    /// Covers `entry_signing_bytes(hash, new_sequence_number)` — the same
    /// digest the ordinary add path verifies, so the refreshed entry
    /// remains independently verifiable once redistributed.
    pub signature: Signature,
}

/// Owner-issued removal of a regular protected entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoveDataMessage {
    /// Hash of the payload to remove.
    pub hash: Hash32,
    /// Must match the stored entry's owner.
    pub owner_pub_key: OwnerPubKey,
    /// Must be strictly greater than the sequence number on file.
    pub sequence_number: u64,
    /// Covers `remove_signing_bytes(hash, sequence_number)`.
    pub signature: Signature,
}

/// Receiver-issued removal of a mailbox entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoveMailboxDataMessage {
    /// Hash of the mailbox payload to remove.
    pub hash: Hash32,
    /// Must match the stored entry's `receiver_pub_key`, not its owner.
    pub receiver_pub_key: OwnerPubKey,
    /// Must be strictly greater than the sequence number on file.
    pub sequence_number: u64,
    /// Covers `mailbox_remove_signing_bytes(hash, sequence_number)`.
    pub signature: Signature,
}

/// Broadcast of a new append-only payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddPersistableNetworkPayloadMessage {
    /// The entry being added.
    pub entry: AppendOnlyEntry,
}

/// First request sent to a newly connected peer: "here is everything I
/// already know about the append-only universe; send me protected data
/// and whatever append-only entries I'm missing."
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreliminaryGetDataRequest {
    /// Echoed back in the response so the requester can match it up.
    pub nonce: u64,
    /// Append-only hashes the requester already holds.
    pub known_append_only_hashes: BTreeSet<Hash32>,
    /// Protected-entry hashes the requester already holds (its main map,
    /// typically empty on first boot).
    pub known_protected_hashes: BTreeSet<Hash32>,
}

/// Follow-up request issued after the preliminary exchange (or
/// periodically), narrowing to protected entries the requester is known
/// to be missing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetUpdatedDataRequest {
    /// Echoed back in the response so the requester can match it up.
    pub nonce: u64,
    /// Protected-entry hashes the requester already holds.
    pub known_protected_hashes: BTreeSet<Hash32>,
}

/// Response to either get-data request, potentially truncated to fit a
/// peer's maximum permitted message size.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetDataResponse {
    /// Echoes the originating request's nonce.
    pub nonce: u64,
    /// Protected entries being sent.
    pub protected_entries: Vec<StorageEntry>,
    /// Append-only entries being sent.
    pub append_only_entries: Vec<AppendOnlyEntry>,
    /// Set once any tier of the truncation pipeline dropped an item.
    /// Process-once append-only payloads are re-applied on a subsequent
    /// response only if this flag is set, since a truncated response may
    /// not have included everything that should be applied exactly once.
    pub was_truncated: bool,
    /// Whether this responds to a `GetUpdatedDataRequest` rather than the
    /// preliminary request sent right after connecting.
    pub is_get_updated_data_response: bool,
}
