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

//! Property tests for the replay-immunity and remove-before-add laws,
//! run against the public `P2PDataStorage` surface over randomized
//! sequence-number orderings.

use agoranet::config::StoreTuning;
use agoranet::core::crypto::hash::hash32;
use agoranet::core::crypto::signing::{entry_signing_bytes, remove_signing_bytes, LocalSigner};
use agoranet::core::interfaces::{Broadcaster, OutboundMessage, PersistenceService};
use agoranet::core::messages::{ProtectedStorageEntry, RemoveDataMessage, StorageEntry};
use agoranet::core::payload::{ProtectedPayload, TextListingPayload};
use agoranet::core::storage::P2PDataStorage;
use async_trait::async_trait;
use libp2p::PeerId;
use proptest::prelude::*;
use ring::rand::SystemRandom;
use ring::signature::Ed25519KeyPair;
use std::sync::Arc;

struct SilentBroadcaster;

#[async_trait]
impl Broadcaster for SilentBroadcaster {
    async fn broadcast(&self, _message: OutboundMessage, _exclude: Option<PeerId>) {}
    async fn send_to(&self, _peer: PeerId, _message: OutboundMessage) {}
}

struct MemoryPersistence<T>(std::marker::PhantomData<T>);

impl<T> MemoryPersistence<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self(std::marker::PhantomData))
    }
}

#[async_trait]
impl<T: Send + Sync> PersistenceService<T> for MemoryPersistence<T> {
    async fn load(&self) -> Option<T> {
        None
    }
    fn request_persistence(&self, _value: T) {}
}

async fn store() -> Arc<P2PDataStorage> {
    P2PDataStorage::new_default(
        Arc::new(SilentBroadcaster),
        Arc::new(agoranet::monitoring::metrics::Metrics::new().unwrap()),
        StoreTuning::default(),
        MemoryPersistence::new(),
        MemoryPersistence::new(),
        MemoryPersistence::new(),
        MemoryPersistence::new(),
    )
    .await
}

fn signer() -> LocalSigner {
    let rng = SystemRandom::new();
    LocalSigner::from_pkcs8(Ed25519KeyPair::generate_pkcs8(&rng).unwrap().as_ref()).unwrap()
}

fn listing_at_seq(owner: &LocalSigner, seq: u64) -> StorageEntry {
    let payload = ProtectedPayload::TextListing(TextListingPayload {
        body: "fixed-price couch".to_string(),
        listed_at_ms: 0,
    });
    let h = hash32(&payload).unwrap();
    let sig = owner.sign(&entry_signing_bytes(h, seq));
    StorageEntry::Regular(ProtectedStorageEntry {
        payload,
        owner_pub_key: owner.public_key(),
        sequence_number: seq,
        created_at_ms: 0,
        ttl_ms: 1_000_000_000,
        signature: sig,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replay_never_succeeds_once_a_higher_or_equal_sequence_is_on_file(
        first_seq in 1u64..10_000,
        delta in 0u64..10_000,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let store = store().await;
            let owner = signer();

            let first = listing_at_seq(&owner, first_seq);
            assert!(store.add_protected_entry(first, None, false).await);

            // A second add at `first_seq.saturating_sub(delta)` can only
            // succeed if it is strictly greater than what's on file.
            let second_seq = first_seq.saturating_sub(delta);
            let second = listing_at_seq(&owner, second_seq);
            let accepted = store.add_protected_entry(second, None, false).await;
            assert_eq!(accepted, second_seq > first_seq);
        });
    }

    #[test]
    fn remove_before_add_always_suppresses_a_same_or_lower_sequence_add(
        remove_seq in 1u64..10_000,
        add_seq_delta in 0u64..10_000,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let store = store().await;
            let owner = signer();

            let probe = listing_at_seq(&owner, 1);
            let h = hash32(probe.payload()).unwrap();

            let remove_sig = owner.sign(&remove_signing_bytes(h, remove_seq));
            let remove_msg = RemoveDataMessage {
                hash: h,
                owner_pub_key: owner.public_key(),
                sequence_number: remove_seq,
                signature: remove_sig,
            };
            assert!(store.remove(remove_msg, None, false).await);

            let add_seq = remove_seq.saturating_sub(add_seq_delta).max(1);
            let add = listing_at_seq(&owner, add_seq);
            let accepted = store.add_protected_entry(add, None, false).await;
            prop_assert_eq!(accepted, add_seq > remove_seq);
            prop_assert_eq!(store.len(), if add_seq > remove_seq { 1 } else { 0 });
        });
    }
}
