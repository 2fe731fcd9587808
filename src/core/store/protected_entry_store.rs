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

//! Persistent store of the subset of live protected entries whose
//! payload is persistable (§3 invariant: "Entries in the protected-entry
//! store are a subset of the main map filtered by the persistable
//! capability"). `core::storage::P2PDataStorage` keeps this store
//! write-through on every add/remove.

use crate::core::crypto::hash::Hash32;
use crate::core::messages::StorageEntry;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Persisted snapshot shape.
pub type Snapshot = BTreeMap<Hash32, StorageEntry>;

/// Write-through mirror of the persistable subset of the live main map.
pub struct ProtectedEntryStore {
    inner: Mutex<Snapshot>,
}

impl ProtectedEntryStore {
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

    /// Write `entry` at `hash`, overwriting any previous value (used on
    /// both add and refresh).
    pub fn put(&self, hash: Hash32, entry: StorageEntry) {
        self.inner.lock().expect("protected-store mutex poisoned").insert(hash, entry);
    }

    /// Drop `hash`, if present.
    pub fn remove(&self, hash: &Hash32) {
        self.inner.lock().expect("protected-store mutex poisoned").remove(hash);
    }

    /// Fetch by hash.
    pub fn get(&self, hash: &Hash32) -> Option<StorageEntry> {
        self.inner
            .lock()
            .expect("protected-store mutex poisoned")
            .get(hash)
            .cloned()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("protected-store mutex poisoned").len()
    }

    /// A consistent point-in-time copy, for persistence.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().expect("protected-store mutex poisoned").clone()
    }
}

impl Default for ProtectedEntryStore {
    fn default() -> Self {
        Self::new()
    }
}
