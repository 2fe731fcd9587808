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

//! Collaborator traits the storage engine is generic over: broadcasting
//! to the gossip mesh, asking the network layer whether a given peer is
//! still connected, and persisting to disk. Concrete implementations live
//! in `networking` (for the first two) and `core::persistence` (for the
//! third), keeping the engine itself free of any libp2p or sled
//! dependency.

use crate::core::messages::{
    AddDataMessage, AddPersistableNetworkPayloadMessage, GetDataResponse,
    GetUpdatedDataRequest, PreliminaryGetDataRequest, RefreshOfferMessage, RemoveDataMessage,
    RemoveMailboxDataMessage,
};
use crate::core::payload::{PeerCapabilities, ProtectedPayload};
use async_trait::async_trait;
use libp2p::PeerId;
use serde::{Deserialize, Serialize};

/// A network message the storage engine broadcasts to every connected
/// peer, or sends to a single peer as a directed reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OutboundMessage {
    /// See [`AddDataMessage`].
    AddData(AddDataMessage),
    /// See [`RefreshOfferMessage`].
    RefreshOffer(RefreshOfferMessage),
    /// See [`RemoveDataMessage`].
    RemoveData(RemoveDataMessage),
    /// See [`RemoveMailboxDataMessage`].
    RemoveMailboxData(RemoveMailboxDataMessage),
    /// See [`AddPersistableNetworkPayloadMessage`].
    AddPersistableNetworkPayload(AddPersistableNetworkPayloadMessage),
    /// See [`PreliminaryGetDataRequest`].
    PreliminaryGetDataRequest(PreliminaryGetDataRequest),
    /// See [`GetUpdatedDataRequest`].
    GetUpdatedDataRequest(GetUpdatedDataRequest),
    /// See [`GetDataResponse`].
    GetDataResponse(GetDataResponse),
}

/// Broadcasts storage-engine events to the gossip mesh, or replies to one
/// peer directly. Implemented by `networking::gossip::LibP2pBroadcaster`.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Broadcast an add/remove/refresh/append-only event to every peer
    /// except `exclude` (typically the peer the event was itself received
    /// from, so a relayed add/remove/refresh isn't echoed straight back to
    /// its sender).
    async fn broadcast(&self, message: OutboundMessage, exclude: Option<PeerId>);

    /// Send a message to exactly one peer (used for get-data responses).
    async fn send_to(&self, peer: PeerId, message: OutboundMessage);
}

/// Gates whether an incoming protected-entry add is accepted, independent
/// of the signature/replay/TTL checks. Implemented by `P2PDataStorage`'s
/// caller to plug in content policy (e.g. spam or abuse filtering) without
/// the storage engine needing to know what that policy is.
pub trait FilterPredicate: Send + Sync {
    /// Whether `payload` may be added to the store.
    fn allows(&self, payload: &ProtectedPayload) -> bool;
}

/// The default filter predicate: accepts everything. Used when no content
/// policy is configured.
pub struct AcceptAllFilter;

impl FilterPredicate for AcceptAllFilter {
    fn allows(&self, _payload: &ProtectedPayload) -> bool {
        true
    }
}

/// Queries the transport layer about peer liveness and advertised
/// capabilities. Implemented by `networking::transport`.
#[async_trait]
pub trait NetworkNode: Send + Sync {
    /// Currently connected peers.
    async fn connected_peers(&self) -> Vec<PeerId>;

    /// Whether `peer` is presently connected.
    async fn is_connected(&self, peer: PeerId) -> bool {
        self.connected_peers().await.contains(&peer)
    }

    /// Capabilities `peer` advertised during its handshake.
    async fn peer_capabilities(&self, peer: PeerId) -> PeerCapabilities;
}

/// Persists a snapshot of a single store to disk, debounced so bursts of
/// writes collapse into one flush. Implemented by
/// `core::persistence::SledPersistence`.
#[async_trait]
pub trait PersistenceService<T>: Send + Sync
where
    T: Send + Sync,
{
    /// Load the last persisted snapshot, if any.
    async fn load(&self) -> Option<T>;

    /// Request a debounced write-through of `value`. Returns immediately;
    /// the actual flush happens on the service's own schedule.
    fn request_persistence(&self, value: T);
}
