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

//! The anti-replay ledger: payload-hash -> (sequence number, last-update
//! timestamp). Entries outlive the data they guard by `PURGE_AGE_DAYS`
//! so a stale, late-arriving add or remove for a hash we've already
//! forgotten in the main map is still rejected as a regression.

use crate::core::crypto::hash::Hash32;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// `(sequenceNr, timeStamp)` as specified in §3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqEntry {
    /// Highest sequence number observed for this hash.
    pub seq_nr: u64,
    /// Wall-clock time of the update that produced `seq_nr`, ms since
    /// Unix epoch.
    pub updated_at_ms: u64,
}

/// Persisted snapshot shape, also used to seed the map on startup.
pub type Snapshot = BTreeMap<Hash32, SeqEntry>;

/// The anti-replay ledger. Synchronizes independently from the main
/// map's mutex per §5 ("The sequence-number map operations synchronize
/// on their own mutex").
pub struct SequenceNumberMap {
    inner: Mutex<Snapshot>,
}

impl SequenceNumberMap {
    /// Build an empty map.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Rebuild from a persisted snapshot, purging anything already older
    /// than `purge_age_ms` relative to `now_ms` (startup load per §4.2).
    pub fn from_snapshot(snapshot: Snapshot, now_ms: u64, purge_age_ms: u64) -> Self {
        let map = Self::new();
        {
            let mut guard = map.inner.lock().expect("sequence map mutex poisoned");
            *guard = snapshot;
        }
        map.purge(now_ms, purge_age_ms);
        map
    }

    /// Current recorded entry for `hash`, if any.
    pub fn get(&self, hash: &Hash32) -> Option<SeqEntry> {
        self.inner
            .lock()
            .expect("sequence map mutex poisoned")
            .get(hash)
            .copied()
    }

    /// Record `(seq_nr, now_ms)` for `hash`, unconditionally overwriting
    /// any prior entry. Callers are responsible for only calling this
    /// once monotonicity has already been checked.
    pub fn put(&self, hash: Hash32, seq_nr: u64, now_ms: u64) {
        let mut guard = self.inner.lock().expect("sequence map mutex poisoned");
        guard.insert(
            hash,
            SeqEntry {
                seq_nr,
                updated_at_ms: now_ms,
            },
        );
    }

    /// Number of tracked hashes.
    pub fn size(&self) -> usize {
        self.inner.lock().expect("sequence map mutex poisoned").len()
    }

    /// Drop entries whose `updated_at_ms` is older than `older_than_ms`
    /// relative to `now_ms`. Purging only ever shrinks the map; it never
    /// lowers the recorded sequence number of any entry it keeps.
    pub fn purge(&self, now_ms: u64, older_than_ms: u64) {
        let mut guard = self.inner.lock().expect("sequence map mutex poisoned");
        guard.retain(|_, entry| {
            now_ms.saturating_sub(entry.updated_at_ms) < older_than_ms
        });
    }

    /// Purge only if `size() > threshold`, per the "scheduled purge"
    /// rule in §4.2.
    pub fn purge_if_oversized(&self, now_ms: u64, older_than_ms: u64, threshold: usize) {
        if self.size() > threshold {
            self.purge(now_ms, older_than_ms);
        }
    }

    /// A consistent point-in-time copy, for persistence.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().expect("sequence map mutex poisoned").clone()
    }
}

impl Default for SequenceNumberMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(b: u8) -> Hash32 {
        Hash32::from_bytes([b; 32])
    }

    #[test]
    fn put_then_get_roundtrips() {
        let map = SequenceNumberMap::new();
        map.put(h(1), 5, 1_000);
        let entry = map.get(&h(1)).unwrap();
        assert_eq!(entry.seq_nr, 5);
        assert_eq!(entry.updated_at_ms, 1_000);
    }

    #[test]
    fn purge_preserves_monotonicity_of_survivors() {
        let map = SequenceNumberMap::new();
        map.put(h(1), 3, 0);
        map.put(h(2), 9, 1_000_000);
        // h(1) is old enough to be purged; h(2) is not.
        map.purge(10_000_000, 5_000_000);
        assert!(map.get(&h(1)).is_none());
        let survivor = map.get(&h(2)).unwrap();
        assert_eq!(survivor.seq_nr, 9);
    }

    #[test]
    fn purge_if_oversized_is_a_noop_below_threshold() {
        let map = SequenceNumberMap::new();
        map.put(h(1), 1, 0);
        map.purge_if_oversized(10_000_000, 1, 10);
        assert!(map.get(&h(1)).is_some());
    }

    #[test]
    fn from_snapshot_purges_stale_entries_on_load() {
        let mut snap = Snapshot::new();
        snap.insert(
            h(1),
            SeqEntry {
                seq_nr: 1,
                updated_at_ms: 0,
            },
        );
        let map = SequenceNumberMap::from_snapshot(snap, 20_000_000, 10_000_000);
        assert!(map.get(&h(1)).is_none());
    }
}
