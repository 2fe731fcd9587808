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

//! `sled`-backed, debounced persistence, adapted from the teacher's
//! `core::state::persistent_state::PersistentState`. Each store (the
//! sequence-number map, the removed-payloads set, the protected-entry
//! store) keeps its whole snapshot under one key in its own `sled` tree
//! rather than one row per entry, since `requestPersistence()` always
//! writes a full, internally-consistent snapshot.

use crate::core::crypto::hash::{decode_canonical_limited, encode_canonical};
use crate::core::interfaces::PersistenceService;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Persistence errors surfaced from the `sled` backend. Per §7, write
/// failures bubble to this layer; the core itself never retries.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Failed to open the database.
    #[error("db open")]
    DbOpen,
    /// A read or write against `sled` failed.
    #[error("db io")]
    DbIo,
}

/// Snapshot persistence for one logical store, debounced so that a burst
/// of `request_persistence` calls collapses into a single flush.
pub struct SledPersistence<T> {
    db: sled::Db,
    key: Vec<u8>,
    pending: Arc<Mutex<Option<T>>>,
    notify: Arc<tokio::sync::Notify>,
}

impl<T> SledPersistence<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open (or create) the `sled` database at `path` and start the
    /// background flush task under `key`.
    pub fn open(path: &str, key: &str) -> Result<Self, PersistenceError> {
        let db = sled::open(path).map_err(|_| PersistenceError::DbOpen)?;
        Ok(Self::from_db(db, key))
    }

    /// Build directly from an already-open `sled::Db`, so multiple
    /// stores can share one database handle (distinguished by `key`).
    pub fn from_db(db: sled::Db, key: &str) -> Self {
        let pending: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let notify = Arc::new(tokio::sync::Notify::new());
        let key_bytes = key.as_bytes().to_vec();

        let bg_db = db.clone();
        let bg_key = key_bytes.clone();
        let bg_pending = pending.clone();
        let bg_notify = notify.clone();
        tokio::spawn(async move {
            loop {
                bg_notify.notified().await;
                let value = bg_pending.lock().expect("persistence mutex poisoned").take();
                let Some(value) = value else {
                    continue;
                };
                match encode_canonical(&value) {
                    Ok(bytes) => {
                        if let Err(err) = bg_db.insert(bg_key.as_slice(), bytes) {
                            tracing::warn!(?err, "persistence write failed");
                        } else if let Err(err) = bg_db.flush_async().await {
                            tracing::warn!(?err, "persistence flush failed");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(?err, "persistence snapshot encode failed");
                    }
                }
            }
        });

        Self {
            db,
            key: key_bytes,
            pending,
            notify,
        }
    }

    /// Synchronous peek at what's currently on disk. Per §6, intended
    /// for tests only — production code should use `load()`.
    pub fn get_persisted(&self) -> Option<T> {
        let bytes = self.db.get(&self.key).ok().flatten()?;
        decode_canonical_limited(&bytes, usize::MAX).ok()
    }
}

#[async_trait]
impl<T> PersistenceService<T> for SledPersistence<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn load(&self) -> Option<T> {
        self.get_persisted()
    }

    fn request_persistence(&self, value: T) {
        *self.pending.lock().expect("persistence mutex poisoned") = Some(value);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[tokio::test]
    async fn request_persistence_is_readable_after_flush() {
        let dir = tempfile::tempdir().unwrap();
        let svc: SledPersistence<BTreeMap<String, u64>> =
            SledPersistence::open(dir.path().to_str().unwrap(), "seq_map").unwrap();

        let mut snapshot = BTreeMap::new();
        snapshot.insert("a".to_string(), 1u64);
        svc.request_persistence(snapshot.clone());

        // Debounced: give the background task a moment to flush.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let loaded = svc.load().await.unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn load_on_empty_db_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let svc: SledPersistence<BTreeMap<String, u64>> =
            SledPersistence::open(dir.path().to_str().unwrap(), "removed_set").unwrap();
        assert!(svc.load().await.is_none());
    }
}
