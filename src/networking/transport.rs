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
#![allow(missing_docs)]

//! The libp2p swarm loop: a concrete [`NetworkNode`] plus the glue that
//! feeds inbound gossip into `core::storage::P2PDataStorage` and drains
//! `LibP2pBroadcaster`'s outbound channel onto the wire. Adapted from
//! the teacher's `networking::p2p::spawn_p2p` — same transport stack
//! (TCP + Noise + Yamux), same `tokio::select!` swarm loop shape, same
//! connection/metrics handling — generalized from one gossiped
//! `ConsensusMsg` type to the full `OutboundMessage` wire surface this
//! store exchanges, plus get-data request/response dispatch into the
//! store.
//!
//! Direct peer-to-peer replies (get-data responses) have no dedicated
//! libp2p stream here: they ride the same gossip topic wrapped in an
//! [`Envelope`] naming the intended recipient, and every other peer
//! silently ignores an envelope not addressed to it. The wire transport
//! is explicitly out of scope for the storage core itself, so this is
//! the simplest thing that lets the crate run end-to-end; a deployment
//! wanting less gossip amplification on replies would swap this for a
//! libp2p request-response protocol instead.

use crate::core::crypto::hash::{decode_canonical_limited, encode_canonical};
use crate::core::interfaces::{NetworkNode, OutboundMessage};
use crate::core::payload::PeerCapabilities;
use crate::core::storage::P2PDataStorage;
use crate::monitoring::metrics::Metrics;
use crate::networking::gossip::OutboundItem;
use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    core::upgrade,
    gossipsub::{self, IdentTopic, MessageAuthenticity},
    identify, noise, ping,
    swarm::{NetworkBehaviour, Swarm, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, Transport,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A filesystem or identity operation failed.
    #[error("io")]
    Io,
    /// `listen_addr` or a bootstrap multiaddr failed to parse, or the
    /// noise/gossipsub stack failed to build.
    #[error("config")]
    Config,
}

/// Runtime configuration for the libp2p transport.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Directory holding the persistent node identity.
    pub data_dir: String,
    /// Multiaddr to listen on, e.g. `/ip4/0.0.0.0/tcp/4501`.
    pub listen_addr: String,
    /// Gossipsub topic carrying every store wire message.
    pub gossip_topic: String,
    /// Bootstrap peer multiaddrs, dialed on startup.
    pub bootstrap: Vec<String>,
    /// Capability tags this node advertises to peers during identify.
    pub capabilities: Vec<String>,
}

/// An outbound item wrapped with its intended recipient (`None` for a
/// true broadcast) before going out over the shared gossip topic.
/// `exclude` names a peer that must silently drop this envelope even
/// though it's otherwise addressed to every subscriber.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Envelope {
    target: Option<Vec<u8>>,
    exclude: Option<Vec<u8>>,
    message: OutboundMessage,
}

#[derive(Default)]
struct PeerTable {
    connected: HashSet<PeerId>,
    capabilities: HashMap<PeerId, PeerCapabilities>,
}

/// `NetworkNode` implementation backed by the swarm loop's shared peer
/// table, updated from `ConnectionEstablished`/`ConnectionClosed` and
/// `identify::Event::Received`.
pub struct LibP2pNetworkNode {
    table: Arc<Mutex<PeerTable>>,
}

#[async_trait]
impl NetworkNode for LibP2pNetworkNode {
    async fn connected_peers(&self) -> Vec<PeerId> {
        self.table
            .lock()
            .expect("peer table mutex poisoned")
            .connected
            .iter()
            .copied()
            .collect()
    }

    async fn peer_capabilities(&self, peer: PeerId) -> PeerCapabilities {
        self.table
            .lock()
            .expect("peer table mutex poisoned")
            .capabilities
            .get(&peer)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug)]
enum BehaviourEvent {
    Gossipsub(gossipsub::Event),
    Identify(identify::Event),
    Ping(ping::Event),
}
impl From<gossipsub::Event> for BehaviourEvent {
    fn from(e: gossipsub::Event) -> Self {
        Self::Gossipsub(e)
    }
}
impl From<identify::Event> for BehaviourEvent {
    fn from(e: identify::Event) -> Self {
        Self::Identify(e)
    }
}
impl From<ping::Event> for BehaviourEvent {
    fn from(e: ping::Event) -> Self {
        Self::Ping(e)
    }
}

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "BehaviourEvent")]
struct Behaviour {
    gossipsub: gossipsub::Behaviour,
    identify: identify::Behaviour,
    ping: ping::Behaviour,
}

fn ensure_dir(path: &str) -> Result<(), TransportError> {
    let p = Path::new(path);
    if !p.exists() {
        std::fs::create_dir_all(p).map_err(|_| TransportError::Io)?;
    }
    Ok(())
}

fn parse_capabilities(agent_version: &str) -> PeerCapabilities {
    let mut caps = std::collections::BTreeSet::new();
    if let Some(tags) = agent_version.split(";cap=").nth(1) {
        for tag in tags.split(',') {
            let tag = tag.trim();
            if !tag.is_empty() {
                caps.insert(tag.to_string());
            }
        }
    }
    PeerCapabilities(caps)
}

fn publish_envelope(
    swarm: &mut Swarm<Behaviour>,
    topic: &IdentTopic,
    target: Option<PeerId>,
    exclude: Option<PeerId>,
    message: OutboundMessage,
) {
    let envelope = Envelope {
        target: target.map(|p| p.to_bytes()),
        exclude: exclude.map(|p| p.to_bytes()),
        message,
    };
    match encode_canonical(&envelope) {
        Ok(bytes) => {
            if let Err(err) = swarm.behaviour_mut().gossipsub.publish(topic.clone(), bytes) {
                debug!(?err, "gossipsub publish failed (no peers yet?)");
            }
        }
        Err(err) => warn!(?err, "failed to encode outbound envelope"),
    }
}

/// Spawn the swarm loop, draining `outbound_rx` for everything the store
/// broadcasts or sends directly (see [`new_outbound_channel`]). Returns a
/// [`LibP2pNetworkNode`] (for capability/liveness queries) and the task's
/// handle.
pub async fn spawn_transport(
    cfg: TransportConfig,
    metrics: Arc<Metrics>,
    storage: Arc<P2PDataStorage>,
    mut outbound_rx: mpsc::Receiver<OutboundItem>,
) -> Result<(Arc<LibP2pNetworkNode>, tokio::task::JoinHandle<()>), TransportError> {
    ensure_dir(&cfg.data_dir)?;

    let (local_peer_id, id_keys) =
        super::p2p_identity::load_or_create_identity(&cfg.data_dir).map_err(|_| TransportError::Io)?;

    let table = Arc::new(Mutex::new(PeerTable::default()));
    let node = Arc::new(LibP2pNetworkNode {
        table: table.clone(),
    });

    let noise_keys = noise::Config::new(&id_keys).map_err(|_| TransportError::Config)?;

    let transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
        .upgrade(upgrade::Version::V1)
        .authenticate(noise_keys)
        .multiplex(yamux::Config::default())
        .boxed();

    let gcfg = gossipsub::ConfigBuilder::default()
        .validation_mode(gossipsub::ValidationMode::Permissive)
        .heartbeat_interval(Duration::from_secs(1))
        .build()
        .map_err(|_| TransportError::Config)?;

    let gossipsub = gossipsub::Behaviour::new(MessageAuthenticity::Signed(id_keys.clone()), gcfg)
        .map_err(|_| TransportError::Config)?;

    let agent_version = if cfg.capabilities.is_empty() {
        "agoranet/1.0.0".to_string()
    } else {
        format!("agoranet/1.0.0;cap={}", cfg.capabilities.join(","))
    };
    let identify = identify::Behaviour::new(identify::Config::new(agent_version, id_keys.public()));

    let ping = ping::Behaviour::new(
        ping::Config::new()
            .with_interval(Duration::from_secs(10))
            .with_timeout(Duration::from_secs(20)),
    );

    let mut swarm = Swarm::new(
        transport,
        Behaviour {
            gossipsub,
            identify,
            ping,
        },
        local_peer_id,
        libp2p::swarm::Config::with_tokio_executor(),
    );

    let topic = IdentTopic::new(cfg.gossip_topic.clone());
    swarm
        .behaviour_mut()
        .gossipsub
        .subscribe(&topic)
        .map_err(|_| TransportError::Config)?;

    let listen: Multiaddr = cfg.listen_addr.parse().map_err(|_| TransportError::Config)?;
    swarm.listen_on(listen).map_err(|_| TransportError::Config)?;

    for b in cfg.bootstrap.iter().map(|x| x.trim()).filter(|x| !x.is_empty()) {
        match b.parse::<Multiaddr>() {
            Ok(ma) => {
                if let Err(err) = swarm.dial(ma) {
                    warn!(boot = %b, ?err, "dial bootstrap failed");
                } else {
                    info!(boot = %b, "dialing bootstrap");
                }
            }
            Err(_) => warn!(boot = %b, "bad bootstrap addr; skipping"),
        }
    }

    info!(%local_peer_id, topic = %cfg.gossip_topic, "p2p loop started");
    metrics.set_p2p_peers(0);

    let join = tokio::spawn(async move {
        let mut nonce_counter: u64 = 1;

        loop {
            tokio::select! {
                maybe_item = outbound_rx.recv() => {
                    match maybe_item {
                        Some((target, exclude, message)) => publish_envelope(&mut swarm, &topic, target, exclude, message),
                        None => {
                            warn!("outbound channel closed; stopping transport task");
                            break;
                        }
                    }
                }

                ev = swarm.select_next_some() => {
                    match ev {
                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "listening");
                        }

                        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                            let peer_count = {
                                let mut t = table.lock().expect("peer table mutex poisoned");
                                t.connected.insert(peer_id);
                                t.connected.len()
                            };
                            metrics.set_p2p_peers(peer_count as i64);
                            info!(%peer_id, "peer connected");

                            let nonce = nonce_counter;
                            nonce_counter = nonce_counter.wrapping_add(1);
                            let request = storage.build_preliminary_request(nonce);
                            publish_envelope(
                                &mut swarm,
                                &topic,
                                Some(peer_id),
                                None,
                                OutboundMessage::PreliminaryGetDataRequest(request),
                            );
                        }

                        SwarmEvent::ConnectionClosed { peer_id, .. } => {
                            let peer_count = {
                                let mut t = table.lock().expect("peer table mutex poisoned");
                                t.connected.remove(&peer_id);
                                t.capabilities.remove(&peer_id);
                                t.connected.len()
                            };
                            metrics.set_p2p_peers(peer_count as i64);
                            info!(%peer_id, "peer disconnected");
                            storage.on_peer_disconnected(peer_id, false);
                        }

                        SwarmEvent::Behaviour(BehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. })) => {
                            let caps = parse_capabilities(&info.agent_version);
                            table.lock().expect("peer table mutex poisoned").capabilities.insert(peer_id, caps);
                        }

                        SwarmEvent::Behaviour(BehaviourEvent::Gossipsub(gossipsub::Event::Message { propagation_source, message, .. })) => {
                            let envelope: Envelope = match decode_canonical_limited(&message.data, 64 * 1024 * 1024) {
                                Ok(e) => e,
                                Err(err) => {
                                    debug!(peer = %propagation_source, ?err, "failed to decode envelope; ignoring");
                                    continue;
                                }
                            };
                            if let Some(target) = &envelope.target {
                                if target.as_slice() != local_peer_id.to_bytes() {
                                    continue;
                                }
                            }
                            if let Some(excluded) = &envelope.exclude {
                                if excluded.as_slice() == local_peer_id.to_bytes() {
                                    continue;
                                }
                            }

                            let peer_caps = table
                                .lock()
                                .expect("peer table mutex poisoned")
                                .capabilities
                                .get(&propagation_source)
                                .cloned()
                                .unwrap_or_default();

                            match envelope.message {
                                OutboundMessage::AddData(msg) => {
                                    storage.add_protected_entry(msg.entry, Some(propagation_source), true).await;
                                }
                                OutboundMessage::RemoveData(msg) => {
                                    storage.remove(msg, Some(propagation_source), true).await;
                                }
                                OutboundMessage::RemoveMailboxData(msg) => {
                                    storage.mailbox_remove(msg, Some(propagation_source), true).await;
                                }
                                OutboundMessage::RefreshOffer(msg) => {
                                    storage.refresh(msg, Some(propagation_source), true).await;
                                }
                                OutboundMessage::AddPersistableNetworkPayload(msg) => {
                                    storage
                                        .add_append_only_payload(
                                            msg.entry.payload,
                                            msg.entry.declared_hash,
                                            Some(propagation_source),
                                            true,
                                            false,
                                            true,
                                        )
                                        .await;
                                }
                                OutboundMessage::GetDataResponse(response) => {
                                    storage.process_get_data_response(response).await;
                                }
                                OutboundMessage::PreliminaryGetDataRequest(req) => {
                                    let mut excluded = req.known_append_only_hashes;
                                    excluded.extend(req.known_protected_hashes);
                                    let response = storage.build_get_data_response(
                                        req.nonce,
                                        &excluded,
                                        None,
                                        &peer_caps,
                                        storage.default_max_permitted_message_size(),
                                        false,
                                    );
                                    publish_envelope(
                                        &mut swarm,
                                        &topic,
                                        Some(propagation_source),
                                        None,
                                        OutboundMessage::GetDataResponse(response),
                                    );
                                }
                                OutboundMessage::GetUpdatedDataRequest(req) => {
                                    let excluded: BTreeSet<_> = req.known_protected_hashes;
                                    let response = storage.build_get_data_response(
                                        req.nonce,
                                        &excluded,
                                        None,
                                        &peer_caps,
                                        storage.default_max_permitted_message_size(),
                                        true,
                                    );
                                    publish_envelope(
                                        &mut swarm,
                                        &topic,
                                        Some(propagation_source),
                                        None,
                                        OutboundMessage::GetDataResponse(response),
                                    );
                                }
                            }
                        }

                        SwarmEvent::Behaviour(BehaviourEvent::Ping(_)) => {}

                        _ => {}
                    }
                }
            }
        }
    });

    Ok((node, join))
}

/// Build the outbound channel pair: the sender wraps into a
/// [`crate::networking::gossip::LibP2pBroadcaster`] for
/// `P2PDataStorage::new`, and the receiver feeds [`spawn_transport`].
/// Split out so storage (which owns the broadcaster) can be constructed
/// before the transport loop (which needs a live storage handle to
/// answer get-data requests).
pub fn new_outbound_channel() -> (
    Arc<crate::networking::gossip::LibP2pBroadcaster>,
    mpsc::Receiver<OutboundItem>,
) {
    let (tx, rx) = mpsc::channel(1024);
    (Arc::new(crate::networking::gossip::LibP2pBroadcaster::new(tx)), rx)
}
