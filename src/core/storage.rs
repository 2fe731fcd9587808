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

//! `P2PDataStorage`: the main in-memory map of live protected entries,
//! and the orchestration for adds, removes, refreshes, TTL expiration,
//! back-dating, and append-only ingest.
//!
//! Lock order, when a call needs more than one: the main map's mutex is
//! always acquired before the sequence-number map's. The sequence-number
//! map and the main map never share a mutex (they purge/grow on
//! different schedules), matching the independent-synchronization rule.

use crate::config::StoreTuning;
use crate::core::crypto::hash::{hash32, Hash32};
use crate::core::crypto::signing::{
    entry_signing_bytes, mailbox_remove_signing_bytes, remove_signing_bytes, verify, OwnerPubKey,
};
use crate::core::get_data::{build_response, select_append_only_candidates, should_transmit};
use crate::core::interfaces::{AcceptAllFilter, Broadcaster, FilterPredicate, OutboundMessage, PersistenceService};
use crate::core::listeners::{ListenerRegistry, StoreEvent};
use crate::core::messages::{
    AddDataMessage, AddPersistableNetworkPayloadMessage, AppendOnlyEntry, GetDataResponse,
    RefreshOfferMessage, RemoveDataMessage, RemoveMailboxDataMessage, StorageEntry,
};
use crate::core::payload::{AppendOnlyPayload, PeerCapabilities, Priority, ProtectedPayload};
use crate::core::security::keystore::Keystore;
use crate::core::store::append_only::{self, AppendOnlyStore};
use crate::core::store::protected_entry_store::{self, ProtectedEntryStore};
use crate::core::store::removed_payloads::{self, RemovedPayloadsSet};
use crate::core::store::sequence_map::{self, SequenceNumberMap};
use crate::monitoring::metrics::Metrics;
use libp2p::PeerId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The main store: a process-wide singleton owning the live protected-
/// entry map and orchestrating every mutation path against it plus its
/// collaborating stores.
pub struct P2PDataStorage {
    main_map: Mutex<BTreeMap<Hash32, StorageEntry>>,
    sequence_map: Arc<SequenceNumberMap>,
    removed_payloads: Arc<RemovedPayloadsSet>,
    append_only: Arc<AppendOnlyStore>,
    protected_store: Arc<ProtectedEntryStore>,
    listeners: ListenerRegistry,
    owner_peers: Mutex<HashMap<OwnerPubKey, PeerId>>,
    broadcaster: Arc<dyn Broadcaster>,
    metrics: Arc<Metrics>,
    tuning: StoreTuning,
    initial_request_applied: AtomicBool,
    seq_persistence: Arc<dyn PersistenceService<sequence_map::Snapshot>>,
    removed_persistence: Arc<dyn PersistenceService<removed_payloads::Snapshot>>,
    protected_persistence: Arc<dyn PersistenceService<protected_entry_store::Snapshot>>,
    append_only_persistence: Arc<dyn PersistenceService<append_only::Snapshot>>,
    filter_predicate: Arc<dyn FilterPredicate>,
    local_keystore: Option<Arc<Keystore>>,
}

impl P2PDataStorage {
    /// Load persisted snapshots (if any) and build the store.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        broadcaster: Arc<dyn Broadcaster>,
        metrics: Arc<Metrics>,
        tuning: StoreTuning,
        seq_persistence: Arc<dyn PersistenceService<sequence_map::Snapshot>>,
        removed_persistence: Arc<dyn PersistenceService<removed_payloads::Snapshot>>,
        protected_persistence: Arc<dyn PersistenceService<protected_entry_store::Snapshot>>,
        append_only_persistence: Arc<dyn PersistenceService<append_only::Snapshot>>,
        filter_predicate: Arc<dyn FilterPredicate>,
        local_keystore: Option<Arc<Keystore>>,
    ) -> Arc<Self> {
        let now = now_ms();

        let seq_snapshot = seq_persistence.load().await.unwrap_or_default();
        let sequence_map = Arc::new(SequenceNumberMap::from_snapshot(
            seq_snapshot,
            now,
            tuning.purge_age_ms(),
        ));

        let removed_snapshot = removed_persistence.load().await.unwrap_or_default();
        let removed_payloads = Arc::new(RemovedPayloadsSet::from_snapshot(removed_snapshot));

        let protected_snapshot = protected_persistence.load().await.unwrap_or_default();
        let main_map = Mutex::new(protected_snapshot.clone());
        let protected_store = Arc::new(ProtectedEntryStore::from_snapshot(protected_snapshot));

        let append_only_snapshot = append_only_persistence.load().await.unwrap_or_default();
        let append_only = Arc::new(AppendOnlyStore::from_snapshot(append_only_snapshot));

        Arc::new(Self {
            main_map,
            sequence_map,
            removed_payloads,
            append_only,
            protected_store,
            listeners: ListenerRegistry::new(),
            owner_peers: Mutex::new(HashMap::new()),
            broadcaster,
            metrics,
            tuning,
            initial_request_applied: AtomicBool::new(false),
            seq_persistence,
            removed_persistence,
            protected_persistence,
            append_only_persistence,
            filter_predicate,
            local_keystore,
        })
    }

    /// Build a store with an always-accept filter predicate and no local
    /// signing identity, for callers that don't need either.
    #[allow(clippy::too_many_arguments)]
    pub async fn new_default(
        broadcaster: Arc<dyn Broadcaster>,
        metrics: Arc<Metrics>,
        tuning: StoreTuning,
        seq_persistence: Arc<dyn PersistenceService<sequence_map::Snapshot>>,
        removed_persistence: Arc<dyn PersistenceService<removed_payloads::Snapshot>>,
        protected_persistence: Arc<dyn PersistenceService<protected_entry_store::Snapshot>>,
        append_only_persistence: Arc<dyn PersistenceService<append_only::Snapshot>>,
    ) -> Arc<Self> {
        Self::new(
            broadcaster,
            metrics,
            tuning,
            seq_persistence,
            removed_persistence,
            protected_persistence,
            append_only_persistence,
            Arc::new(AcceptAllFilter),
            None,
        )
        .await
    }

    /// Register a local listener for store mutations.
    pub fn register_listener(&self, listener: Arc<dyn crate::core::listeners::StoreListener>) {
        self.listeners.register(listener);
    }

    /// Number of live protected entries.
    pub fn len(&self) -> usize {
        self.main_map.lock().expect("main map mutex poisoned").len()
    }

    /// Whether the main map is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reject(&self, operation: &'static str, reason: &'static str, hash: Hash32) {
        tracing::debug!(hash = %hash, operation, reason, "rejected");
        self.metrics.record_rejection(operation, reason);
    }

    fn reject_warn(&self, operation: &'static str, reason: &'static str, hash: Hash32) {
        tracing::warn!(hash = %hash, operation, reason, "rejected");
        self.metrics.record_rejection(operation, reason);
    }

    fn validate_for_add(&self, entry: &StorageEntry, h: Hash32) -> Result<(), &'static str> {
        let sig_msg = entry_signing_bytes(h, entry.sequence_number());
        if verify(entry.owner_pub_key(), &sig_msg, entry.signature()).is_err() {
            return Err("bad_signature");
        }
        if let StorageEntry::Mailbox(m) = entry {
            let ProtectedPayload::MailboxMessage(p) = &m.entry.payload else {
                return Err("receiver_mismatch");
            };
            if p.receiver != m.receiver_pub_key {
                return Err("receiver_mismatch");
            }
        }
        Ok(())
    }

    fn request_persist_sequence_map(&self) {
        self.seq_persistence.request_persistence(self.sequence_map.snapshot());
    }

    fn request_persist_removed(&self) {
        self.removed_persistence.request_persistence(self.removed_payloads.snapshot());
    }

    fn request_persist_protected(&self) {
        self.protected_persistence.request_persistence(self.protected_store.snapshot());
    }

    fn request_persist_append_only(&self) {
        self.append_only_persistence.request_persistence(self.append_only.snapshot());
    }

    /// Add (or accept the very first copy of) a protected entry. §4.3.
    pub async fn add_protected_entry(
        self: &Arc<Self>,
        entry: StorageEntry,
        sender: Option<PeerId>,
        allow_broadcast: bool,
    ) -> bool {
        let now = now_ms();
        let h = match hash32(entry.payload()) {
            Ok(h) => h,
            Err(_) => return false,
        };
        let meta = entry.payload().meta();

        {
            let mut map = self.main_map.lock().expect("main map mutex poisoned");

            if let Some(stored) = map.get(&h) {
                if entry.sequence_number() <= stored.sequence_number() {
                    self.reject("add", "replay", h);
                    return false;
                }
            }

            if meta.is_add_once && self.removed_payloads.contains(&h) {
                self.reject("add", "revoked", h);
                return false;
            }

            if entry.created_at_ms().saturating_add(entry.ttl_ms()) < now {
                self.reject("add", "expired", h);
                return false;
            }

            if let Some(seq_entry) = self.sequence_map.get(&h) {
                if seq_entry.seq_nr > entry.sequence_number() {
                    self.reject("add", "regression", h);
                    return false;
                }
            }

            if let Err(reason) = self.validate_for_add(&entry, h) {
                self.reject("add", reason, h);
                return false;
            }

            if let Some(stored) = map.get(&h) {
                if stored.owner_pub_key() != entry.owner_pub_key() {
                    self.reject("add", "owner_mismatch", h);
                    return false;
                }
            }

            if !self.filter_predicate.allows(entry.payload()) {
                self.reject("add", "filtered", h);
                return false;
            }

            map.insert(h, entry.clone());
            self.sequence_map.put(h, entry.sequence_number(), now);
            if meta.is_persistable {
                self.protected_store.put(h, entry.clone());
            }
            if let Some(peer) = sender {
                self.owner_peers
                    .lock()
                    .expect("owner index mutex poisoned")
                    .insert(entry.owner_pub_key().clone(), peer);
            }
        }

        self.request_persist_sequence_map();
        if meta.is_persistable {
            self.request_persist_protected();
        }
        self.listeners.notify(StoreEvent::ProtectedAdded(h, entry.clone()));
        self.metrics.set_protected_entries(self.len() as i64);
        self.metrics.set_sequence_map_size(self.sequence_map.size() as i64);

        if allow_broadcast {
            self.broadcaster
                .broadcast(OutboundMessage::AddData(AddDataMessage { entry }), sender)
                .await;
        }
        true
    }

    /// Owner-issued removal of a regular protected entry. §4.4.
    pub async fn remove(
        self: &Arc<Self>,
        msg: RemoveDataMessage,
        sender: Option<PeerId>,
        allow_broadcast: bool,
    ) -> bool {
        let now = now_ms();
        let h = msg.hash;

        if let Some(seq) = self.sequence_map.get(&h) {
            if msg.sequence_number <= seq.seq_nr {
                self.reject("remove", "replay", h);
                return false;
            }
        }

        let sig_msg = remove_signing_bytes(h, msg.sequence_number);
        if verify(&msg.owner_pub_key, &sig_msg, &msg.signature).is_err() {
            self.reject("remove", "bad_signature", h);
            return false;
        }

        let removed = {
            let mut map = self.main_map.lock().expect("main map mutex poisoned");
            if let Some(stored) = map.get(&h) {
                if stored.owner_pub_key() != &msg.owner_pub_key {
                    self.reject("remove", "owner_mismatch", h);
                    return false;
                }
            }

            // Both gates (signature, and owner-match when something is
            // stored) passed: the ledger advances regardless of whether
            // anything was actually removed, so a later stale add for
            // this hash is still rejected as a regression.
            self.sequence_map.put(h, msg.sequence_number, now);
            map.remove(&h)
        };

        self.request_persist_sequence_map();

        if let Some(stored) = removed {
            if stored.payload().meta().is_add_once {
                self.removed_payloads.insert(h);
                self.request_persist_removed();
                self.metrics.set_removed_payloads_size(self.removed_payloads.size() as i64);
            }
            self.protected_store.remove(&h);
            self.request_persist_protected();
            self.listeners.notify(StoreEvent::ProtectedRemoved(h, stored));
            self.metrics.set_protected_entries(self.len() as i64);
        }

        if allow_broadcast {
            self.broadcaster
                .broadcast(OutboundMessage::RemoveData(msg), sender)
                .await;
        }
        true
    }

    /// Receiver-issued removal of a mailbox entry. §4.4.
    pub async fn mailbox_remove(
        self: &Arc<Self>,
        msg: RemoveMailboxDataMessage,
        sender: Option<PeerId>,
        allow_broadcast: bool,
    ) -> bool {
        let now = now_ms();
        let h = msg.hash;

        if let Some(seq) = self.sequence_map.get(&h) {
            if msg.sequence_number <= seq.seq_nr {
                self.reject("mailbox_remove", "replay", h);
                return false;
            }
        }

        let sig_msg = mailbox_remove_signing_bytes(h, msg.sequence_number);
        if verify(&msg.receiver_pub_key, &sig_msg, &msg.signature).is_err() {
            self.reject("mailbox_remove", "bad_signature", h);
            return false;
        }

        let removed = {
            let mut map = self.main_map.lock().expect("main map mutex poisoned");
            let receiver_matches = match map.get(&h) {
                Some(StorageEntry::Mailbox(m)) => m.receiver_pub_key == msg.receiver_pub_key,
                Some(StorageEntry::Regular(_)) => false,
                None => true,
            };
            if !receiver_matches {
                self.reject("mailbox_remove", "receiver_mismatch", h);
                return false;
            }

            self.sequence_map.put(h, msg.sequence_number, now);
            map.remove(&h)
        };

        self.request_persist_sequence_map();

        if let Some(stored) = removed {
            if stored.payload().meta().is_add_once {
                self.removed_payloads.insert(h);
                self.request_persist_removed();
                self.metrics.set_removed_payloads_size(self.removed_payloads.size() as i64);
            }
            self.protected_store.remove(&h);
            self.request_persist_protected();
            self.listeners.notify(StoreEvent::ProtectedRemoved(h, stored));
            self.metrics.set_protected_entries(self.len() as i64);
        }

        if allow_broadcast {
            self.broadcaster
                .broadcast(OutboundMessage::RemoveMailboxData(msg), sender)
                .await;
        }
        true
    }

    /// Refresh the TTL of an already-known protected entry. §4.5.
    pub async fn refresh(
        self: &Arc<Self>,
        msg: RefreshOfferMessage,
        sender: Option<PeerId>,
        allow_broadcast: bool,
    ) -> bool {
        let now = now_ms();
        let h = msg.hash;

        let stored = {
            let map = self.main_map.lock().expect("main map mutex poisoned");
            match map.get(&h) {
                Some(stored) => stored.clone(),
                None => {
                    self.reject("refresh", "unknown_hash", h);
                    return false;
                }
            }
        };

        if stored.owner_pub_key() != &msg.owner_pub_key {
            self.reject("refresh", "owner_mismatch", h);
            return false;
        }

        let mut rebuilt = stored.clone();
        match &mut rebuilt {
            StorageEntry::Regular(e) => {
                e.created_at_ms = now;
                e.sequence_number = msg.new_sequence_number;
                e.signature = msg.signature.clone();
            }
            StorageEntry::Mailbox(m) => {
                m.entry.created_at_ms = now;
                m.entry.sequence_number = msg.new_sequence_number;
                m.entry.signature = msg.signature.clone();
            }
        }

        if rebuilt.sequence_number() <= stored.sequence_number() {
            self.reject("refresh", "replay", h);
            return false;
        }

        if let Some(seq_entry) = self.sequence_map.get(&h) {
            if seq_entry.seq_nr > rebuilt.sequence_number() {
                self.reject("refresh", "regression", h);
                return false;
            }
        }

        // Applies the add-path validation checks: the rebuilt entry's
        // signature must verify against the ordinary add-path digest
        // (entry_signing_bytes), so it stays independently verifiable
        // under the standard add validator when later redistributed to
        // other peers via a get-data response.
        if let Err(reason) = self.validate_for_add(&rebuilt, h) {
            self.reject("refresh", reason, h);
            return false;
        }

        {
            let mut map = self.main_map.lock().expect("main map mutex poisoned");
            map.insert(h, rebuilt.clone());
        }
        self.sequence_map.put(h, rebuilt.sequence_number(), now);
        if rebuilt.payload().meta().is_persistable {
            self.protected_store.put(h, rebuilt.clone());
            self.request_persist_protected();
        }
        self.request_persist_sequence_map();
        self.listeners.notify(StoreEvent::ProtectedAdded(h, rebuilt.clone()));

        if allow_broadcast {
            self.broadcaster
                .broadcast(OutboundMessage::RefreshOffer(msg), sender)
                .await;
        }
        true
    }

    /// Originate and sign a mailbox message under this node's own
    /// identity, then add it through the ordinary add path. `false` if no
    /// local keystore was configured or the local rate limiter rejected
    /// the signature.
    pub async fn originate_mailbox_message(
        self: &Arc<Self>,
        receiver: OwnerPubKey,
        ciphertext: Vec<u8>,
        ttl_ms: u64,
    ) -> bool {
        let Some(keystore) = self.local_keystore.clone() else {
            tracing::warn!("originate_mailbox_message called with no local keystore configured");
            return false;
        };

        let payload = ProtectedPayload::MailboxMessage(crate::core::payload::MailboxMessagePayload {
            receiver: receiver.clone(),
            ciphertext,
        });
        let h = match hash32(&payload) {
            Ok(h) => h,
            Err(_) => return false,
        };
        let seq = self.sequence_map.get(&h).map(|s| s.seq_nr + 1).unwrap_or(1);
        let sig = match keystore.sign(&entry_signing_bytes(h, seq)) {
            Ok(sig) => sig,
            Err(_) => {
                self.reject("add", "rate_limited", h);
                return false;
            }
        };

        let entry = StorageEntry::Mailbox(crate::core::messages::ProtectedMailboxEntry {
            entry: crate::core::messages::ProtectedStorageEntry {
                payload,
                owner_pub_key: keystore.public_key(),
                sequence_number: seq,
                created_at_ms: now_ms(),
                ttl_ms,
                signature: sig,
            },
            receiver_pub_key: receiver,
        });

        self.add_protected_entry(entry, None, true).await
    }

    /// Refresh the TTL of an entry this node owns, re-signing under the
    /// local keystore at the next sequence number. `false` if no local
    /// keystore was configured, the hash isn't on file, or the local rate
    /// limiter rejected the signature.
    pub async fn refresh_owned(self: &Arc<Self>, hash: Hash32) -> bool {
        let Some(keystore) = self.local_keystore.clone() else {
            tracing::warn!("refresh_owned called with no local keystore configured");
            return false;
        };
        let new_seq = match self.sequence_map.get(&hash) {
            Some(seq) => seq.seq_nr + 1,
            None => {
                self.reject("refresh", "unknown_hash", hash);
                return false;
            }
        };
        let sig = match keystore.sign(&entry_signing_bytes(hash, new_seq)) {
            Ok(sig) => sig,
            Err(_) => {
                self.reject("refresh", "rate_limited", hash);
                return false;
            }
        };
        let msg = RefreshOfferMessage {
            hash,
            owner_pub_key: keystore.public_key(),
            new_sequence_number: new_seq,
            signature: sig,
        };
        self.refresh(msg, None, true).await
    }

    /// Remove every expired entry. Does not touch the sequence-number
    /// map (§4.6: stale late adds for the same hash must still be
    /// rejected). Also runs the scheduled sequence-map purge.
    pub async fn sweep_expired(self: &Arc<Self>) {
        let now = now_ms();

        let expired: Vec<(Hash32, StorageEntry)> = {
            let mut map = self.main_map.lock().expect("main map mutex poisoned");
            let expired_hashes: Vec<Hash32> = map
                .iter()
                .filter(|(_, e)| e.created_at_ms().saturating_add(e.ttl_ms()) < now)
                .map(|(h, _)| *h)
                .collect();
            expired_hashes
                .into_iter()
                .filter_map(|h| map.remove(&h).map(|e| (h, e)))
                .collect()
        };

        if !expired.is_empty() {
            for (h, _) in &expired {
                self.protected_store.remove(h);
            }
            self.request_persist_protected();
            for (h, e) in expired {
                self.listeners.notify(StoreEvent::ProtectedRemoved(h, e));
            }
            self.metrics.set_protected_entries(self.len() as i64);
        }

        self.sequence_map.purge_if_oversized(
            now,
            self.tuning.purge_age_ms(),
            self.tuning.max_sequence_number_map_size_before_purge,
        );
        self.request_persist_sequence_map();
        self.metrics.set_sequence_map_size(self.sequence_map.size() as i64);
    }

    /// Back-date every entry owned by `peer` that requires owner
    /// liveness, on an unintended disconnect. §4.6.
    pub fn on_peer_disconnected(self: &Arc<Self>, peer: PeerId, intended: bool) {
        if intended {
            return;
        }

        let owners: Vec<OwnerPubKey> = {
            let owner_peers = self.owner_peers.lock().expect("owner index mutex poisoned");
            owner_peers
                .iter()
                .filter(|(_, p)| **p == peer)
                .map(|(o, _)| o.clone())
                .collect()
        };
        if owners.is_empty() {
            return;
        }

        let touched = {
            let mut map = self.main_map.lock().expect("main map mutex poisoned");
            let mut touched = 0usize;
            for entry in map.values_mut() {
                if entry.payload().meta().is_requires_owner_online && owners.contains(entry.owner_pub_key()) {
                    entry.back_date();
                    touched += 1;
                }
            }
            touched
        };

        if touched > 0 {
            self.request_persist_protected();
            tracing::debug!(peer = %peer, count = touched, "back-dated entries on unintended disconnect");
        }
    }

    /// Build the preliminary request to send a newly-connected peer.
    pub fn build_preliminary_request(&self, nonce: u64) -> crate::core::messages::PreliminaryGetDataRequest {
        let known_protected_hashes: BTreeSet<Hash32> = self
            .main_map
            .lock()
            .expect("main map mutex poisoned")
            .keys()
            .copied()
            .collect();
        crate::core::get_data::build_preliminary_request(nonce, &self.append_only, known_protected_hashes)
    }

    /// The configured ceiling on a get-data response's size when the
    /// requesting peer hasn't advertised its own maximum.
    pub fn default_max_permitted_message_size(&self) -> usize {
        self.tuning.default_max_permitted_message_size
    }

    /// Ingest an append-only payload. §4.7.
    pub async fn add_append_only_payload(
        self: &Arc<Self>,
        payload: AppendOnlyPayload,
        declared_hash: Hash32,
        sender: Option<PeerId>,
        allow_broadcast: bool,
        allow_rebroadcast: bool,
        check_date: bool,
    ) -> bool {
        let now = now_ms();

        let actual_hash = match hash32(&payload) {
            Ok(h) => h,
            Err(_) => {
                self.reject_warn("append_only", "hash_size_mismatch", declared_hash);
                return false;
            }
        };
        if actual_hash != declared_hash {
            self.reject_warn("append_only", "hash_size_mismatch", declared_hash);
            return false;
        }

        if self.append_only.contains(&actual_hash) && !allow_rebroadcast {
            return false;
        }

        if check_date {
            if let Some(tolerance) = payload.meta().date_tolerance {
                if !tolerance.is_within_tolerance(now) {
                    self.reject_warn("append_only", "date_tolerance", actual_hash);
                    return false;
                }
            }
        }

        let newly_added = self.append_only.insert(actual_hash, payload.clone());
        if newly_added {
            self.request_persist_append_only();
            self.listeners
                .notify(StoreEvent::AppendOnlyAdded(actual_hash, payload.clone()));
            self.metrics.set_append_only_entries(self.append_only.len() as i64);

            if allow_broadcast {
                self.broadcaster
                    .broadcast(
                        OutboundMessage::AddPersistableNetworkPayload(AddPersistableNetworkPayloadMessage {
                            entry: AppendOnlyEntry {
                                payload,
                                declared_hash: actual_hash,
                            },
                        }),
                        sender,
                    )
                    .await;
            }
        }
        newly_added
    }

    /// Build a get-data response for a peer that excludes `excluded`.
    #[allow(clippy::too_many_arguments)]
    pub fn build_get_data_response(
        &self,
        nonce: u64,
        excluded: &BTreeSet<Hash32>,
        requester_version: Option<u32>,
        peer_caps: &PeerCapabilities,
        max_permitted_message_size: usize,
        is_get_updated_data_response: bool,
    ) -> GetDataResponse {
        let protected_candidates: Vec<(Hash32, StorageEntry)> = {
            let map = self.main_map.lock().expect("main map mutex poisoned");
            map.iter()
                .filter(|(h, e)| {
                    !excluded.contains(h) && should_transmit(peer_caps, e.payload().meta().required_capabilities)
                })
                .map(|(h, e)| (*h, e.clone()))
                .collect()
        };

        let append_only_candidates: Vec<(Hash32, AppendOnlyPayload)> =
            select_append_only_candidates(&self.append_only, requester_version)
                .into_iter()
                .filter(|(h, p)| !excluded.contains(h) && should_transmit(peer_caps, p.meta().required_capabilities))
                .collect();

        build_response(
            nonce,
            protected_candidates,
            append_only_candidates,
            max_permitted_message_size,
            self.tuning.response_size_budget_fraction,
            self.tuning.append_only_size_share,
            self.tuning.max_entries_per_type,
            is_get_updated_data_response,
        )
    }

    /// Ingest a get-data response: regular add path with broadcast
    /// suppressed, HIGH-priority entries get a delayed rebroadcast for
    /// resilience, and process-once append-only payloads apply only on
    /// the first response per startup or on a truncated response. §4.8.
    pub async fn process_get_data_response(self: &Arc<Self>, response: GetDataResponse) {
        let was_first = !self.initial_request_applied.swap(true, Ordering::SeqCst);
        let apply_process_once = was_first || response.was_truncated;

        for entry in response.protected_entries {
            let high_priority = matches!(entry.payload().meta().priority, Priority::High);
            let entry_for_rebroadcast = entry.clone();
            let accepted = self.add_protected_entry(entry, None, false).await;
            if accepted && high_priority {
                let this = Arc::clone(self);
                let delay = Duration::from_secs(self.tuning.initial_rebroadcast_delay_sec);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    this.broadcaster
                        .broadcast(
                            OutboundMessage::AddData(AddDataMessage {
                                entry: entry_for_rebroadcast,
                            }),
                            None,
                        )
                        .await;
                });
            }
        }

        for ao in response.append_only_entries {
            if ao.payload.meta().is_process_once && !apply_process_once {
                continue;
            }
            self.add_append_only_payload(ao.payload, ao.declared_hash, None, false, true, true)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::signing::LocalSigner;
    use crate::core::messages::ProtectedStorageEntry;
    use crate::core::payload::{MailboxMessagePayload, TextListingPayload};
    use async_trait::async_trait;
    use ring::rand::SystemRandom;
    use ring::signature::Ed25519KeyPair;

    struct NullBroadcaster;

    #[async_trait]
    impl Broadcaster for NullBroadcaster {
        async fn broadcast(&self, _message: OutboundMessage, _exclude: Option<PeerId>) {}
        async fn send_to(&self, _peer: PeerId, _message: OutboundMessage) {}
    }

    struct NullPersistence<T>(std::marker::PhantomData<T>);

    impl<T> NullPersistence<T> {
        fn new() -> Arc<Self> {
            Arc::new(Self(std::marker::PhantomData))
        }
    }

    #[async_trait]
    impl<T: Send + Sync> PersistenceService<T> for NullPersistence<T> {
        async fn load(&self) -> Option<T> {
            None
        }
        fn request_persistence(&self, _value: T) {}
    }

    async fn test_storage() -> Arc<P2PDataStorage> {
        P2PDataStorage::new_default(
            Arc::new(NullBroadcaster),
            Arc::new(Metrics::new().unwrap()),
            StoreTuning::default(),
            NullPersistence::new(),
            NullPersistence::new(),
            NullPersistence::new(),
            NullPersistence::new(),
        )
        .await
    }

    fn signer() -> LocalSigner {
        let rng = SystemRandom::new();
        LocalSigner::from_pkcs8(Ed25519KeyPair::generate_pkcs8(&rng).unwrap().as_ref()).unwrap()
    }

    fn mailbox_payload(signer: &LocalSigner, receiver: OwnerPubKey, seq: u64) -> StorageEntry {
        let payload = ProtectedPayload::MailboxMessage(MailboxMessagePayload {
            receiver: receiver.clone(),
            ciphertext: vec![1, 2, 3],
        });
        let h = hash32(&payload).unwrap();
        let sig = signer.sign(&entry_signing_bytes(h, seq));
        StorageEntry::Regular(ProtectedStorageEntry {
            payload,
            owner_pub_key: signer.public_key(),
            sequence_number: seq,
            created_at_ms: 0,
            ttl_ms: 1_000_000_000,
            signature: sig,
        })
    }

    fn signed_remove(signer: &LocalSigner, h: Hash32, seq: u64) -> RemoveDataMessage {
        let sig = signer.sign(&remove_signing_bytes(h, seq));
        RemoveDataMessage {
            hash: h,
            owner_pub_key: signer.public_key(),
            sequence_number: seq,
            signature: sig,
        }
    }

    #[tokio::test]
    async fn add_then_remove_then_replay_matches_the_reference_trace() {
        let store = test_storage().await;
        let owner = signer();
        let receiver = OwnerPubKey([9u8; 32]);
        let entry = mailbox_payload(&owner, receiver, 1);
        let h = hash32(entry.payload()).unwrap();

        assert!(store.add_protected_entry(entry.clone(), None, false).await);
        assert_eq!(store.len(), 1);

        let remove_msg = signed_remove(&owner, h, 2);
        assert!(store.remove(remove_msg, None, false).await);
        assert_eq!(store.len(), 0);

        // Re-send the original add (seq=1): must be rejected as a replay.
        assert!(!store.add_protected_entry(entry, None, false).await);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn refresh_without_a_prior_add_is_rejected() {
        let store = test_storage().await;
        let owner = signer();
        let h = Hash32::from_bytes([5u8; 32]);
        let sig = owner.sign(&entry_signing_bytes(h, 2));
        let msg = RefreshOfferMessage {
            hash: h,
            owner_pub_key: owner.public_key(),
            new_sequence_number: 2,
            signature: sig,
        };
        assert!(!store.refresh(msg, None, false).await);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn remove_before_add_suppresses_the_late_add() {
        let store = test_storage().await;
        let owner = signer();
        let receiver = OwnerPubKey([3u8; 32]);
        let entry = mailbox_payload(&owner, receiver, 1);
        let h = hash32(entry.payload()).unwrap();

        let remove_msg = signed_remove(&owner, h, 5);
        assert!(store.remove(remove_msg, None, false).await);

        assert!(!store.add_protected_entry(entry, None, false).await);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn back_dating_halves_ttl_on_unintended_disconnect() {
        let store = test_storage().await;
        let owner = signer();
        let listing = ProtectedPayload::TextListing(TextListingPayload {
            body: "a used bicycle".to_string(),
            listed_at_ms: 0,
        });
        let h = hash32(&listing).unwrap();
        let sig = owner.sign(&entry_signing_bytes(h, 1));
        let entry = StorageEntry::Regular(ProtectedStorageEntry {
            payload: listing,
            owner_pub_key: owner.public_key(),
            sequence_number: 1,
            created_at_ms: 0,
            ttl_ms: 1_000,
            signature: sig,
        });

        let peer = PeerId::random();
        assert!(store.add_protected_entry(entry, Some(peer), false).await);

        store.on_peer_disconnected(peer, false);

        let h = hash32(&ProtectedPayload::TextListing(TextListingPayload {
            body: "a used bicycle".to_string(),
            listed_at_ms: 0,
        }))
        .unwrap();
        let stored = {
            let map = store.main_map.lock().unwrap();
            map.get(&h).cloned().unwrap()
        };
        assert_eq!(stored.ttl_ms(), 500);
    }
}
