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

//! Local listener notification: registration lists the storage engine
//! fires after mutating the main map and the sequence-number map. Per §5
//! ("Listener sets are copy-on-write ... may be invoked concurrently"),
//! registration is copy-on-write so a snapshot is taken before
//! iterating, and notification never blocks a concurrent `register`
//! call or holds the main-map lock across listener code.

use crate::core::crypto::hash::Hash32;
use crate::core::messages::StorageEntry;
use crate::core::payload::AppendOnlyPayload;
use std::sync::{Arc, RwLock};

/// A change the storage engine reports to local listeners.
#[derive(Clone, Debug)]
pub enum StoreEvent {
    /// A protected entry was added or refreshed.
    ProtectedAdded(Hash32, StorageEntry),
    /// A protected entry was removed (explicitly or via expiration).
    ProtectedRemoved(Hash32, StorageEntry),
    /// A new append-only payload was ingested.
    AppendOnlyAdded(Hash32, AppendOnlyPayload),
}

/// Something that wants to observe store mutations.
pub trait StoreListener: Send + Sync {
    /// Called once per mutation, after the map and sequence-number map
    /// have been updated and persistence has been requested.
    fn on_event(&self, event: &StoreEvent);
}

/// Copy-on-write registry of [`StoreListener`]s.
pub struct ListenerRegistry {
    listeners: RwLock<Arc<Vec<Arc<dyn StoreListener>>>>,
}

impl ListenerRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Register a listener. Takes effect for subsequent `notify` calls;
    /// never blocks a `notify` already in progress.
    pub fn register(&self, listener: Arc<dyn StoreListener>) {
        let mut guard = self.listeners.write().expect("listener registry poisoned");
        let mut next = (**guard).clone();
        next.push(listener);
        *guard = Arc::new(next);
    }

    /// Currently-registered listener count.
    pub fn len(&self) -> usize {
        self.listeners.read().expect("listener registry poisoned").len()
    }

    /// Whether no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire `event` at a snapshot of the currently-registered listeners.
    pub fn notify(&self, event: StoreEvent) {
        let snapshot = self.listeners.read().expect("listener registry poisoned").clone();
        for listener in snapshot.iter() {
            listener.on_event(&event);
        }
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        count: AtomicUsize,
    }

    impl StoreListener for CountingListener {
        fn on_event(&self, _event: &StoreEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn notify_reaches_all_registered_listeners() {
        let registry = ListenerRegistry::new();
        let a = Arc::new(CountingListener {
            count: AtomicUsize::new(0),
        });
        let b = Arc::new(CountingListener {
            count: AtomicUsize::new(0),
        });
        registry.register(a.clone());
        registry.register(b.clone());

        let h = Hash32::from_bytes([1u8; 32]);
        registry.notify(StoreEvent::AppendOnlyAdded(
            h,
            AppendOnlyPayload::AttachmentBlob(crate::core::payload::AttachmentBlobPayload {
                bytes: vec![],
                created_at_ms: 0,
            }),
        ));

        assert_eq!(a.count.load(Ordering::SeqCst), 1);
        assert_eq!(b.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registering_mid_iteration_does_not_affect_the_in_flight_snapshot() {
        let registry = ListenerRegistry::new();
        assert_eq!(registry.len(), 0);
        registry.register(Arc::new(CountingListener {
            count: AtomicUsize::new(0),
        }));
        assert_eq!(registry.len(), 1);
    }
}
