#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Agoranet node entrypoint (systemd-friendly).
//! Loads config, starts the store, the P2P transport, and the metrics
//! endpoint, and keeps the process alive until asked to shut down.

use std::net::SocketAddr;
use std::sync::Arc;

use agoranet::config::NodeConfig;
use agoranet::core::interfaces::AcceptAllFilter;
use agoranet::core::persistence::SledPersistence;
use agoranet::core::security::keystore::Keystore;
use agoranet::core::storage::P2PDataStorage;
use agoranet::core::store::{append_only, protected_entry_store, removed_payloads, sequence_map};
use agoranet::monitoring::metrics::Metrics;
use agoranet::networking::transport::{self, TransportConfig};
use tracing::{info, warn};

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .json()
        .try_init();

    let config_path = env("AGORANET_CONFIG", "./agoranet.toml");
    let cfg = NodeConfig::load_or_default(&config_path);

    info!(data_dir = %cfg.data_dir, listen_addr = %cfg.network.listen_addr, "agoranet node starting");

    let metrics = Arc::new(Metrics::new().expect("metrics init failed"));

    let db_path = format!("{}/store.sled", cfg.data_dir);
    let db = match sled::open(&db_path) {
        Ok(db) => db,
        Err(err) => {
            eprintln!("failed to open store database at {db_path}: {err}");
            std::process::exit(1);
        }
    };

    let seq_persistence: Arc<SledPersistence<sequence_map::Snapshot>> =
        Arc::new(SledPersistence::from_db(db.clone(), "sequence_map"));
    let removed_persistence: Arc<SledPersistence<removed_payloads::Snapshot>> =
        Arc::new(SledPersistence::from_db(db.clone(), "removed_payloads"));
    let protected_persistence: Arc<SledPersistence<protected_entry_store::Snapshot>> =
        Arc::new(SledPersistence::from_db(db.clone(), "protected_entries"));
    let append_only_persistence: Arc<SledPersistence<append_only::Snapshot>> =
        Arc::new(SledPersistence::from_db(db, "append_only"));

    let local_keystore = match Keystore::open(&cfg.data_dir) {
        Ok(ks) => Some(Arc::new(ks)),
        Err(err) => {
            warn!(?err, "local keystore unavailable; this node cannot originate mailbox replies or refreshes");
            None
        }
    };

    let transport_cfg = TransportConfig {
        data_dir: cfg.data_dir.clone(),
        listen_addr: cfg.network.listen_addr.clone(),
        gossip_topic: cfg.network.gossip_topic.clone(),
        bootstrap: cfg.network.bootstrap.clone(),
        capabilities: vec!["mailbox".to_string(), "blob-transfer".to_string()],
    };

    let (node, storage) = bootstrap_storage(
        transport_cfg,
        metrics.clone(),
        cfg.store,
        seq_persistence,
        removed_persistence,
        protected_persistence,
        append_only_persistence,
        local_keystore,
    )
    .await;
    let _ = node;

    let sweep_interval = std::time::Duration::from_secs(cfg.store.check_ttl_interval_sec);
    let sweep_storage = storage.clone();
    let sweep_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            sweep_storage.sweep_expired().await;
        }
    });

    let metrics_addr: SocketAddr = match cfg.metrics_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            warn!(?err, addr = %cfg.metrics_addr, "bad metrics_addr; metrics endpoint disabled");
            let _ = tokio::signal::ctrl_c().await;
            sweep_task.abort();
            return;
        }
    };
    let metrics_for_server = metrics.clone();
    let metrics_task = tokio::spawn(async move {
        if let Err(err) = agoranet::monitoring::serve(metrics_addr, metrics_for_server).await {
            warn!(?err, "metrics server exited");
        }
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => warn!(?err, "failed to listen for shutdown signal"),
    }

    sweep_task.abort();
    metrics_task.abort();
}

/// Two-phase startup: `P2PDataStorage::new` needs a `Broadcaster` up
/// front, and the transport loop needs a live storage handle to answer
/// get-data requests. `transport::new_outbound_channel` splits the
/// broadcaster from its receiver so the store can hold the former while
/// the swarm loop (spawned after the store exists) drains the latter.
#[allow(clippy::too_many_arguments)]
async fn bootstrap_storage(
    transport_cfg: TransportConfig,
    metrics: Arc<Metrics>,
    tuning: agoranet::config::StoreTuning,
    seq_persistence: Arc<SledPersistence<sequence_map::Snapshot>>,
    removed_persistence: Arc<SledPersistence<removed_payloads::Snapshot>>,
    protected_persistence: Arc<SledPersistence<protected_entry_store::Snapshot>>,
    append_only_persistence: Arc<SledPersistence<append_only::Snapshot>>,
    local_keystore: Option<Arc<Keystore>>,
) -> (Arc<transport::LibP2pNetworkNode>, Arc<P2PDataStorage>) {
    let (broadcaster, outbound_rx) = transport::new_outbound_channel();

    let storage = P2PDataStorage::new(
        broadcaster,
        metrics.clone(),
        tuning,
        seq_persistence,
        removed_persistence,
        protected_persistence,
        append_only_persistence,
        Arc::new(AcceptAllFilter),
        local_keystore,
    )
    .await;

    match transport::spawn_transport(transport_cfg, metrics, storage.clone(), outbound_rx).await {
        Ok((node, _join)) => (node, storage),
        Err(err) => {
            eprintln!("transport start failed: {err}");
            std::process::exit(1);
        }
    }
}
