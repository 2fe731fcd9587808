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

//! Get-data reconciliation: request building, the five-step truncation
//! pipeline that produces a size/count-bounded [`GetDataResponse`], and
//! capability gating.

use crate::core::crypto::hash::{encode_canonical, Hash32};
use crate::core::messages::{
    AppendOnlyEntry, GetDataResponse, GetUpdatedDataRequest, PreliminaryGetDataRequest,
    StorageEntry,
};
use crate::core::payload::{AppendOnlyPayload, PeerCapabilities, Priority};
use crate::core::store::append_only::AppendOnlyStore;
use std::collections::BTreeSet;

/// Build the preliminary request sent to a newly-connected peer: every
/// hash already known locally across all append-only stores plus every
/// hash in the main map (§4.8).
pub fn build_preliminary_request(
    nonce: u64,
    append_only: &AppendOnlyStore,
    known_protected_hashes: BTreeSet<Hash32>,
) -> PreliminaryGetDataRequest {
    PreliminaryGetDataRequest {
        nonce,
        known_append_only_hashes: append_only.known_hashes().into_iter().collect(),
        known_protected_hashes,
    }
}

/// Build a follow-up request narrowing to protected entries the
/// requester is known to be missing.
pub fn build_updated_request(nonce: u64, known_protected_hashes: BTreeSet<Hash32>) -> GetUpdatedDataRequest {
    GetUpdatedDataRequest {
        nonce,
        known_protected_hashes,
    }
}

/// `shouldTransmit(peerCaps, payload)`: the peer must advertise every
/// capability the payload requires.
pub fn should_transmit(peer_caps: &PeerCapabilities, required_capabilities: &[&'static str]) -> bool {
    peer_caps.supports_all(required_capabilities)
}

/// Pick the append-only candidate pool for a given (nullable) requester
/// protocol version: `None` (an older peer sent nothing) means "respond
/// with all historical data".
pub fn select_append_only_candidates(
    store: &AppendOnlyStore,
    requester_version: Option<u32>,
) -> Vec<(Hash32, AppendOnlyPayload)> {
    match requester_version {
        None => store.map_live().into_iter().collect(),
        Some(v) => store.map_since_version(v).into_iter().collect(),
    }
}

/// Inputs shared by both sides of the five-step truncation pipeline.
struct Candidate<T> {
    hash: Hash32,
    item: T,
    priority: Priority,
    date_sorted_ts_ms: Option<u64>,
    max_items: Option<usize>,
    size_bytes: usize,
}

/// The five-step truncation pipeline (§4.8), generic over either side
/// (protected entries or append-only payloads). Returns the admitted
/// items in final wire order and whether anything was dropped.
fn truncate<T: Clone>(candidates: Vec<Candidate<T>>, size_limit: usize, max_entries: usize) -> (Vec<(Hash32, T)>, bool) {
    let mut mid = Vec::new();
    let mut low_plain = Vec::new();
    let mut low_dated = Vec::new();
    let mut high = Vec::new();

    for c in candidates {
        match c.priority {
            Priority::Mid => mid.push(c),
            Priority::High => high.push(c),
            Priority::Low if c.date_sorted_ts_ms.is_some() => low_dated.push(c),
            Priority::Low => low_plain.push(c),
        }
    }

    let mut result: Vec<(Hash32, T)> = Vec::new();
    let mut total_size: usize = 0;
    let mut size_exceeded = false;

    // Step 1: MID unconditionally.
    for c in mid {
        result.push((c.hash, c.item));
    }

    // Step 2: LOW, not date-sorted, size-budgeted.
    for c in low_plain {
        if total_size.saturating_add(c.size_bytes) > size_limit {
            size_exceeded = true;
            break;
        }
        total_size += c.size_bytes;
        result.push((c.hash, c.item));
    }

    // Step 3: LOW, date-sorted-truncatable, only if step 2 didn't
    // already exhaust the size budget.
    if !size_exceeded {
        let mut admitted: Vec<Candidate<T>> = Vec::new();
        for c in low_dated {
            if total_size.saturating_add(c.size_bytes) > size_limit {
                size_exceeded = true;
                break;
            }
            total_size += c.size_bytes;
            admitted.push(c);
        }

        let cap = admitted.iter().filter_map(|c| c.max_items).min();
        if let Some(cap) = cap {
            if admitted.len() > cap {
                admitted.sort_by_key(|c| c.date_sorted_ts_ms.unwrap_or(0));
                admitted = admitted.split_off(admitted.len() - cap);
            }
        }
        // Newest-first, so step 4's truncate() cuts the oldest first.
        admitted.sort_by_key(|c| std::cmp::Reverse(c.date_sorted_ts_ms.unwrap_or(0)));
        result.extend(admitted.into_iter().map(|c| (c.hash, c.item)));
    }

    // Step 4: overall count cap.
    let mut was_truncated = size_exceeded;
    if result.len() > max_entries {
        result.truncate(max_entries);
        was_truncated = true;
    }

    // Step 5: HIGH bypasses both budgets.
    for c in high {
        result.push((c.hash, c.item));
    }

    (result, was_truncated)
}

/// Build a get-data response from already-filtered candidate pools (the
/// caller has already excluded known hashes and gated on capability —
/// see [`should_transmit`]).
#[allow(clippy::too_many_arguments)]
pub fn build_response(
    nonce: u64,
    protected_candidates: Vec<(Hash32, StorageEntry)>,
    append_only_candidates: Vec<(Hash32, AppendOnlyPayload)>,
    max_permitted_message_size: usize,
    response_size_budget_fraction: f64,
    append_only_size_share: f64,
    max_entries_per_type: usize,
    is_get_updated_data_response: bool,
) -> GetDataResponse {
    let max_bytes = (max_permitted_message_size as f64 * response_size_budget_fraction) as usize;
    let append_only_limit = (max_bytes as f64 * append_only_size_share) as usize;
    let protected_limit = max_bytes.saturating_sub(append_only_limit);

    let protected: Vec<Candidate<StorageEntry>> = protected_candidates
        .into_iter()
        .map(|(hash, entry)| {
            let meta = entry.payload().meta();
            let size_bytes = encode_canonical(&entry).map(|b| b.len()).unwrap_or(usize::MAX);
            Candidate {
                hash,
                item: entry,
                priority: meta.priority,
                date_sorted_ts_ms: meta.date_sorted.map(|d| d.timestamp_ms),
                max_items: meta.date_sorted.map(|d| d.max_items),
                size_bytes,
            }
        })
        .collect();

    let append_only: Vec<Candidate<AppendOnlyPayload>> = append_only_candidates
        .into_iter()
        .map(|(hash, payload)| {
            let meta = payload.meta();
            let size_bytes = encode_canonical(&payload).map(|b| b.len()).unwrap_or(usize::MAX);
            Candidate {
                hash,
                item: payload,
                priority: meta.priority,
                date_sorted_ts_ms: None,
                max_items: None,
                size_bytes,
            }
        })
        .collect();

    let (protected_entries, protected_truncated) = truncate(protected, protected_limit, max_entries_per_type);
    let (append_only_items, append_only_truncated) = truncate(append_only, append_only_limit, max_entries_per_type);

    let append_only_entries = append_only_items
        .into_iter()
        .map(|(hash, payload)| AppendOnlyEntry {
            payload,
            declared_hash: hash,
        })
        .collect();

    GetDataResponse {
        nonce,
        protected_entries: protected_entries.into_iter().map(|(_, e)| e).collect(),
        append_only_entries,
        was_truncated: protected_truncated || append_only_truncated,
        is_get_updated_data_response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::signing::OwnerPubKey;
    use crate::core::messages::ProtectedStorageEntry;
    use crate::core::payload::{
        MailboxMessagePayload, ProtectedPayload, TextListingPayload, LISTING_MAX_ITEMS,
    };

    fn hash(b: u8) -> Hash32 {
        Hash32::from_bytes([b; 32])
    }

    fn mailbox_entry(seq: u64) -> StorageEntry {
        StorageEntry::Regular(ProtectedStorageEntry {
            payload: ProtectedPayload::MailboxMessage(MailboxMessagePayload {
                receiver: OwnerPubKey([0u8; 32]),
                ciphertext: vec![0u8; 16],
            }),
            owner_pub_key: OwnerPubKey([1u8; 32]),
            sequence_number: seq,
            created_at_ms: 0,
            ttl_ms: 1000,
            signature: crate::core::crypto::signing::Signature(vec![0u8; 64]),
        })
    }

    fn listing_entry(seq: u64, listed_at_ms: u64, body_len: usize) -> StorageEntry {
        StorageEntry::Regular(ProtectedStorageEntry {
            payload: ProtectedPayload::TextListing(TextListingPayload {
                body: "x".repeat(body_len),
                listed_at_ms,
            }),
            owner_pub_key: OwnerPubKey([2u8; 32]),
            sequence_number: seq,
            created_at_ms: 0,
            ttl_ms: 1000,
            signature: crate::core::crypto::signing::Signature(vec![0u8; 64]),
        })
    }

    #[test]
    fn mid_priority_items_bypass_the_size_budget() {
        let candidates = vec![(hash(1), mailbox_entry(1))];
        let resp = build_response(0, candidates, vec![], 0, 0.6, 0.25, 200, false);
        assert_eq!(resp.protected_entries.len(), 1);
        assert!(!resp.was_truncated);
    }

    #[test]
    fn low_non_sorted_items_are_size_budgeted() {
        // Each listing body is ~1KB; give a tiny size budget via a tiny
        // max_permitted_message_size so only a handful fit.
        let candidates: Vec<_> = (0..50)
            .map(|i| (hash(i), listing_entry(i as u64 + 1, i as u64, 1000)))
            .collect();
        let resp = build_response(0, candidates, vec![], 20_000, 0.6, 0.25, 200, false);
        assert!(resp.protected_entries.len() < 50);
        assert!(resp.was_truncated);
    }

    #[test]
    fn date_sorted_truncation_keeps_the_newest_within_max_items() {
        let mut candidates = Vec::new();
        for i in 0..(LISTING_MAX_ITEMS as u64 + 10) {
            candidates.push((hash((i % 255) as u8), listing_entry(i + 1, i, 10)));
        }
        let resp = build_response(0, candidates, vec![], 100_000_000, 0.6, 0.25, LISTING_MAX_ITEMS + 1000, false);
        assert!(resp.protected_entries.len() <= LISTING_MAX_ITEMS);
    }

    #[test]
    fn count_cap_truncates_and_sets_flag() {
        let candidates: Vec<_> = (0..20)
            .map(|i| (hash(i), mailbox_entry(i as u64 + 1)))
            .collect();
        let resp = build_response(0, candidates, vec![], 10_000_000, 0.6, 0.25, 5, false);
        assert_eq!(resp.protected_entries.len(), 5);
        assert!(resp.was_truncated);
    }
}
