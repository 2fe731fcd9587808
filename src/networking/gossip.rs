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

//! [`Broadcaster`] implementation sitting in front of the swarm loop's
//! outbound channel, so `core::storage::P2PDataStorage` never touches
//! libp2p types directly.

use crate::core::interfaces::{Broadcaster, OutboundMessage};
use async_trait::async_trait;
use libp2p::PeerId;
use tokio::sync::mpsc;
use tracing::warn;

/// Outbound item handed to the swarm loop: `target` of `None` means
/// "gossip to every subscriber"; `Some(peer)` means "address only this
/// peer" (still carried over the shared gossip topic — see `transport`).
/// `exclude` names a peer that must ignore the envelope even though it's
/// otherwise a broadcast, so a relayed event isn't echoed back to the
/// peer it arrived from.
pub type OutboundItem = (Option<PeerId>, Option<PeerId>, OutboundMessage);

/// Forwards `broadcast`/`send_to` calls onto the swarm loop's channel.
pub struct LibP2pBroadcaster {
    outbound_tx: mpsc::Sender<OutboundItem>,
}

impl LibP2pBroadcaster {
    /// Wrap the swarm loop's outbound sender.
    pub fn new(outbound_tx: mpsc::Sender<OutboundItem>) -> Self {
        Self { outbound_tx }
    }
}

#[async_trait]
impl Broadcaster for LibP2pBroadcaster {
    async fn broadcast(&self, message: OutboundMessage, exclude: Option<PeerId>) {
        if self.outbound_tx.send((None, exclude, message)).await.is_err() {
            warn!("outbound channel closed; dropping broadcast");
        }
    }

    async fn send_to(&self, peer: PeerId, message: OutboundMessage) {
        if self.outbound_tx.send((Some(peer), None, message)).await.is_err() {
            warn!(%peer, "outbound channel closed; dropping directed message");
        }
    }
}
