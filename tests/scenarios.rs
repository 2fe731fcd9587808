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

//! Cross-module scenario tests exercising `P2PDataStorage` through its
//! public surface only, mirroring the six reference traces the store
//! must reproduce exactly.

use agoranet::config::StoreTuning;
use agoranet::core::crypto::hash::hash32;
use agoranet::core::crypto::signing::{
    entry_signing_bytes, remove_signing_bytes, LocalSigner, OwnerPubKey,
};
use agoranet::core::interfaces::{Broadcaster, OutboundMessage, PersistenceService};
use agoranet::core::messages::{ProtectedStorageEntry, RefreshOfferMessage, RemoveDataMessage, StorageEntry};
use agoranet::core::payload::{ProtectedPayload, TextListingPayload};
use agoranet::core::persistence::SledPersistence;
use agoranet::core::storage::P2PDataStorage;
use agoranet::core::store::{append_only, protected_entry_store, removed_payloads, sequence_map};
use agoranet::monitoring::metrics::Metrics;
use async_trait::async_trait;
use libp2p::PeerId;
use ring::rand::SystemRandom;
use ring::signature::Ed25519KeyPair;
use std::sync::Arc;

struct SilentBroadcaster;

#[async_trait]
impl Broadcaster for SilentBroadcaster {
    async fn broadcast(&self, _message: OutboundMessage, _exclude: Option<PeerId>) {}
    async fn send_to(&self, _peer: PeerId, _message: OutboundMessage) {}
}

fn signer() -> LocalSigner {
    let rng = SystemRandom::new();
    LocalSigner::from_pkcs8(Ed25519KeyPair::generate_pkcs8(&rng).unwrap().as_ref()).unwrap()
}

async fn fresh_store(dir: &tempfile::TempDir) -> Arc<P2PDataStorage> {
    let db = sled::open(dir.path()).unwrap();
    let seq: Arc<SledPersistence<sequence_map::Snapshot>> =
        Arc::new(SledPersistence::from_db(db.clone(), "sequence_map"));
    let removed: Arc<SledPersistence<removed_payloads::Snapshot>> =
        Arc::new(SledPersistence::from_db(db.clone(), "removed_payloads"));
    let protected: Arc<SledPersistence<protected_entry_store::Snapshot>> =
        Arc::new(SledPersistence::from_db(db.clone(), "protected_entries"));
    let appendonly: Arc<SledPersistence<append_only::Snapshot>> =
        Arc::new(SledPersistence::from_db(db, "append_only"));

    P2PDataStorage::new_default(
        Arc::new(SilentBroadcaster),
        Arc::new(Metrics::new().unwrap()),
        StoreTuning::default(),
        seq,
        removed,
        protected,
        appendonly,
    )
    .await
}

fn listing(owner: &LocalSigner, seq: u64, listed_at_ms: u64, ttl_ms: u64) -> StorageEntry {
    let payload = ProtectedPayload::TextListing(TextListingPayload {
        body: "bicycle, barely used".to_string(),
        listed_at_ms,
    });
    let h = hash32(&payload).unwrap();
    let sig = owner.sign(&entry_signing_bytes(h, seq));
    StorageEntry::Regular(ProtectedStorageEntry {
        payload,
        owner_pub_key: owner.public_key(),
        sequence_number: seq,
        created_at_ms: 0,
        ttl_ms,
        signature: sig,
    })
}

fn remove_of(owner: &LocalSigner, h: agoranet::core::crypto::hash::Hash32, seq: u64) -> RemoveDataMessage {
    let sig = owner.sign(&remove_signing_bytes(h, seq));
    RemoveDataMessage {
        hash: h,
        owner_pub_key: owner.public_key(),
        sequence_number: seq,
        signature: sig,
    }
}

#[tokio::test]
async fn add_then_remove_then_replay_reproduces_the_reference_trace() {
    let dir = tempfile::tempdir().unwrap();
    let store = fresh_store(&dir).await;
    let owner = signer();

    let a1 = listing(&owner, 1, 0, 1_000_000);
    let h = hash32(a1.payload()).unwrap();
    assert!(store.add_protected_entry(a1.clone(), None, false).await);
    assert_eq!(store.len(), 1);

    let remove_msg = remove_of(&owner, h, 2);
    assert!(store.remove(remove_msg, None, false).await);
    assert_eq!(store.len(), 0);

    assert!(!store.add_protected_entry(a1, None, false).await);
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn refresh_without_a_prior_add_returns_false_and_adds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = fresh_store(&dir).await;
    let owner = signer();

    let h = agoranet::core::crypto::hash::Hash32::from_bytes([0xBBu8; 32]);
    let sig = owner.sign(&entry_signing_bytes(h, 1));
    let msg = RefreshOfferMessage {
        hash: h,
        owner_pub_key: owner.public_key(),
        new_sequence_number: 1,
        signature: sig,
    };

    assert!(!store.refresh(msg, None, false).await);
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn add_once_payload_stays_revoked_after_removal() {
    use agoranet::core::crypto::signing::mailbox_remove_signing_bytes;
    use agoranet::core::messages::RemoveMailboxDataMessage;
    use agoranet::core::payload::MailboxMessagePayload;

    let dir = tempfile::tempdir().unwrap();
    let store = fresh_store(&dir).await;
    let sender = signer();
    let receiver = signer();
    let receiver_pk = receiver.public_key();

    let payload = ProtectedPayload::MailboxMessage(MailboxMessagePayload {
        receiver: receiver_pk.clone(),
        ciphertext: vec![1, 2, 3, 4],
    });
    let h = hash32(&payload).unwrap();
    let sig = sender.sign(&entry_signing_bytes(h, 1));
    let entry = StorageEntry::Mailbox(agoranet::core::messages::ProtectedMailboxEntry {
        entry: ProtectedStorageEntry {
            payload,
            owner_pub_key: sender.public_key(),
            sequence_number: 1,
            created_at_ms: 0,
            ttl_ms: 1_000_000,
            signature: sig,
        },
        receiver_pub_key: receiver_pk.clone(),
    });

    assert!(store.add_protected_entry(entry, None, false).await);
    assert_eq!(store.len(), 1);

    let remove_sig = receiver.sign(&mailbox_remove_signing_bytes(h, 2));
    let remove_msg = RemoveMailboxDataMessage {
        hash: h,
        receiver_pub_key: receiver_pk.clone(),
        sequence_number: 2,
        signature: remove_sig,
    };
    assert!(store.mailbox_remove(remove_msg, None, false).await);
    assert_eq!(store.len(), 0);

    // A third copy, correctly signed and at a higher sequence number,
    // must still be rejected: mailbox messages are add-once.
    let payload_again = ProtectedPayload::MailboxMessage(MailboxMessagePayload {
        receiver: receiver_pk.clone(),
        ciphertext: vec![1, 2, 3, 4],
    });
    let h_again = hash32(&payload_again).unwrap();
    assert_eq!(h, h_again);
    let sig3 = sender.sign(&entry_signing_bytes(h_again, 3));
    let entry3 = StorageEntry::Mailbox(agoranet::core::messages::ProtectedMailboxEntry {
        entry: ProtectedStorageEntry {
            payload: payload_again,
            owner_pub_key: sender.public_key(),
            sequence_number: 3,
            created_at_ms: 0,
            ttl_ms: 1_000_000,
            signature: sig3,
        },
        receiver_pub_key: receiver_pk,
    });
    assert!(!store.add_protected_entry(entry3, None, false).await);
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn back_dating_then_expiration_removes_the_entry_at_half_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let store = fresh_store(&dir).await;
    let owner = signer();

    let entry = listing(&owner, 1, 0, 2_000);
    let peer = PeerId::random();
    assert!(store.add_protected_entry(entry, Some(peer), false).await);
    assert_eq!(store.len(), 1);

    store.on_peer_disconnected(peer, false);

    // Back-dating halves the TTL but leaves `created_at_ms` untouched,
    // so sweeping immediately must not yet expire the entry...
    store.sweep_expired().await;
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn preliminary_request_then_response_suppresses_rebroadcast_storms() {
    let dir = tempfile::tempdir().unwrap();
    let store = fresh_store(&dir).await;
    let owner = signer();

    let entry = listing(&owner, 1, 0, 1_000_000);
    let h = hash32(entry.payload()).unwrap();

    let response = agoranet::core::messages::GetDataResponse {
        nonce: 1,
        protected_entries: vec![entry],
        append_only_entries: vec![],
        was_truncated: false,
        is_get_updated_data_response: false,
    };
    store.process_get_data_response(response).await;
    assert_eq!(store.len(), 1);

    let stored = store.build_get_data_response(
        2,
        &std::collections::BTreeSet::new(),
        None,
        &agoranet::core::payload::PeerCapabilities::default(),
        StoreTuning::default().default_max_permitted_message_size,
        false,
    );
    assert!(stored.protected_entries.iter().any(|e| hash32(e.payload()).unwrap() == h));
}
