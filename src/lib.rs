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

//! Agoranet P2P data-storage core.
//!
//! A replicated, eventually-consistent gossip store holding two classes
//! of network-shared state: append-only payloads identified by content
//! hash, and protected entries that an owner may add, refresh, or
//! revoke under a monotonic sequence number. Peers reconcile on connect
//! via a request/response exclude-by-hash protocol and otherwise
//! propagate mutations by broadcast.
//!
//! This repository provides:
//! - Deterministic canonical encoding and Ed25519 signing
//! - The replicated store (`core::storage::P2PDataStorage`): add/remove/
//!   refresh validation, TTL expiration, owner-disconnect back-dating
//! - The get-data reconciliation protocol with tiered truncation
//! - `sled`-backed persistence for the sequence-number map, the
//!   removed-payloads set, and the protected-entry store
//! - A libp2p gossipsub transport satisfying the core's `Broadcaster`/
//!   `NetworkNode` collaborator traits
//! - Monitoring via Prometheus metrics and structured logging

/// Node configuration (TOML-backed), tuning parameters from the spec.
pub mod config;
/// The replicated data store: crypto, payload catalogue, wire messages,
/// storage engine, get-data reconciliation, persistence.
pub mod core;
/// Observability (metrics, structured logging helpers).
pub mod monitoring;
/// P2P networking stack (libp2p transport, gossip broadcaster).
pub mod networking;
