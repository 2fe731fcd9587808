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

//! The set of hashes whose add-once payload was permanently retracted.
//! Membership here is forever: no future add for a matching hash may
//! ever be stored again.

use crate::core::crypto::hash::Hash32;
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Persisted snapshot shape.
pub type Snapshot = BTreeSet<Hash32>;

/// Set of permanently-revoked add-once payload hashes.
pub struct RemovedPayloadsSet {
    inner: Mutex<Snapshot>,
}

impl RemovedPayloadsSet {
    /// Build an empty set.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeSet::new()),
        }
    }

    /// Rebuild from a persisted snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }

    /// Whether `hash` was permanently revoked.
    pub fn contains(&self, hash: &Hash32) -> bool {
        self.inner.lock().expect("removed-set mutex poisoned").contains(hash)
    }

    /// Permanently revoke `hash`. Idempotent.
    pub fn insert(&self, hash: Hash32) {
        self.inner.lock().expect("removed-set mutex poisoned").insert(hash);
    }

    /// Number of revoked hashes.
    pub fn size(&self) -> usize {
        self.inner.lock().expect("removed-set mutex poisoned").len()
    }

    /// A consistent point-in-time copy, for persistence.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().expect("removed-set mutex poisoned").clone()
    }
}

impl Default for RemovedPayloadsSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_contains() {
        let set = RemovedPayloadsSet::new();
        let h = Hash32::from_bytes([9u8; 32]);
        assert!(!set.contains(&h));
        set.insert(h);
        assert!(set.contains(&h));
        assert_eq!(set.size(), 1);
    }

    #[test]
    fn insert_is_idempotent() {
        let set = RemovedPayloadsSet::new();
        let h = Hash32::from_bytes([1u8; 32]);
        set.insert(h);
        set.insert(h);
        assert_eq!(set.size(), 1);
    }
}
