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

//! Content-addressed, immutable store for append-only payloads. Never
//! shrinks: no key is ever deleted once inserted.
//!
//! The original design splits "historical" append-only stores out as a
//! distinct service that additionally answers "what's new since
//! protocol version V". Here every [`AppendOnlyPayload`] already
//! declares its own `version` via `meta()`, so one map serves both
//! `getMapOfLiveData()` (the whole map — there is only one generation of
//! any given hash) and `getMapSinceVersion(v)` (a version-filtered view).

use crate::core::crypto::hash::Hash32;
use crate::core::payload::AppendOnlyPayload;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Persisted snapshot shape.
pub type Snapshot = BTreeMap<Hash32, AppendOnlyPayload>;

/// The append-only store. Monotonic: `insert` never removes a key.
pub struct AppendOnlyStore {
    inner: Mutex<Snapshot>,
}

impl AppendOnlyStore {
    /// Build an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Rebuild from a persisted snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }

    /// Whether `hash` is already present.
    pub fn contains(&self, hash: &Hash32) -> bool {
        self.inner.lock().expect("append-only mutex poisoned").contains_key(hash)
    }

    /// Fetch a stored payload by hash.
    pub fn get(&self, hash: &Hash32) -> Option<AppendOnlyPayload> {
        self.inner
            .lock()
            .expect("append-only mutex poisoned")
            .get(hash)
            .cloned()
    }

    /// Insert `payload` at `hash` if not already present. Returns `true`
    /// if this call newly added it.
    pub fn insert(&self, hash: Hash32, payload: AppendOnlyPayload) -> bool {
        let mut guard = self.inner.lock().expect("append-only mutex poisoned");
        if guard.contains_key(&hash) {
            return false;
        }
        guard.insert(hash, payload);
        true
    }

    /// Number of stored payloads.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("append-only mutex poisoned").len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All hashes currently known, for building the preliminary get-data
    /// request's excluded-hash set.
    pub fn known_hashes(&self) -> Vec<Hash32> {
        self.inner
            .lock()
            .expect("append-only mutex poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// `getMapOfLiveData()`: the entire live map.
    pub fn map_live(&self) -> Snapshot {
        self.inner.lock().expect("append-only mutex poisoned").clone()
    }

    /// `getMapSinceVersion(v)`: only payloads whose declared protocol
    /// version is `>= v`. A `None` requester version (older peer) means
    /// "respond with all historical data" — callers should use
    /// [`AppendOnlyStore::map_live`] in that case instead.
    pub fn map_since_version(&self, v: u32) -> Snapshot {
        self.inner
            .lock()
            .expect("append-only mutex poisoned")
            .iter()
            .filter(|(_, payload)| payload.meta().version >= v)
            .map(|(h, p)| (*h, p.clone()))
            .collect()
    }

    /// A consistent point-in-time copy, for persistence.
    pub fn snapshot(&self) -> Snapshot {
        self.map_live()
    }
}

impl Default for AppendOnlyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::payload::AttachmentBlobPayload;

    fn blob(created_at_ms: u64) -> AppendOnlyPayload {
        AppendOnlyPayload::AttachmentBlob(AttachmentBlobPayload {
            bytes: vec![1, 2, 3],
            created_at_ms,
        })
    }

    #[test]
    fn insert_is_monotonic() {
        let store = AppendOnlyStore::new();
        let h = Hash32::from_bytes([1u8; 32]);
        assert!(store.insert(h, blob(0)));
        assert!(!store.insert(h, blob(0)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn map_since_version_filters() {
        let store = AppendOnlyStore::new();
        let h = Hash32::from_bytes([2u8; 32]);
        store.insert(h, blob(1_000));
        // AttachmentBlobPayload declares version 1.
        assert_eq!(store.map_since_version(1).len(), 1);
        assert_eq!(store.map_since_version(2).len(), 0);
    }
}
