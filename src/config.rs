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

//! TOML-backed node configuration: data directories, networking, and the
//! tuning parameters §6 of the spec says are "configured at
//! construction" (purge age, TTL sweep interval, response size budget).

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Configuration load/parse errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Could not read the config file.
    #[error("read config")]
    Read,
    /// Could not parse the config file as TOML.
    #[error("parse config")]
    Parse,
}

/// Store tuning parameters, matching the names in §6 of the spec.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct StoreTuning {
    /// Sequence-number-map entries are retained at least this long after
    /// their last update.
    pub purge_age_days: u64,
    /// How often the TTL-expiration sweep runs.
    pub check_ttl_interval_sec: u64,
    /// Sequence-number map purge is triggered once its size exceeds this.
    pub max_sequence_number_map_size_before_purge: usize,
    /// Fraction of a peer's max permitted message size a get-data
    /// response may use.
    pub response_size_budget_fraction: f64,
    /// Share of the response size budget allocated to append-only
    /// payloads; the remainder goes to protected entries.
    pub append_only_size_share: f64,
    /// Per-type cap on the number of entries in a single get-data
    /// response.
    pub max_entries_per_type: usize,
    /// Delay before re-broadcasting a HIGH-priority protected entry
    /// received via get-data response ingest.
    pub initial_rebroadcast_delay_sec: u64,
    /// Upper bound on a single peer's declared maximum message size,
    /// used when a peer advertises none.
    pub default_max_permitted_message_size: usize,
}

impl Default for StoreTuning {
    fn default() -> Self {
        Self {
            purge_age_days: 10,
            check_ttl_interval_sec: 60,
            max_sequence_number_map_size_before_purge: 100_000,
            response_size_budget_fraction: 0.6,
            append_only_size_share: 0.25,
            max_entries_per_type: 200,
            initial_rebroadcast_delay_sec: 60,
            default_max_permitted_message_size: 10 * 1024 * 1024,
        }
    }
}

impl StoreTuning {
    /// `PURGE_AGE_DAYS` expressed in milliseconds.
    pub fn purge_age_ms(&self) -> u64 {
        self.purge_age_days * 24 * 60 * 60 * 1000
    }
}

/// Networking configuration, mirroring the teacher's `P2pConfig`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// libp2p multiaddr to listen on.
    pub listen_addr: String,
    /// Gossipsub topic carrying store wire messages.
    pub gossip_topic: String,
    /// Bootstrap peer multiaddrs, dialed on startup.
    pub bootstrap: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/4501".to_string(),
            gossip_topic: "agoranet-store-v1".to_string(),
            bootstrap: Vec::new(),
        }
    }
}

/// Root node configuration, loaded from a TOML file (or defaults).
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding the sled persistence databases and the node's
    /// Ed25519 identity/keystore files.
    pub data_dir: String,
    /// Address the Prometheus metrics endpoint binds to.
    pub metrics_addr: String,
    /// Store tuning parameters.
    pub store: StoreTuning,
    /// Networking configuration.
    pub network: NetworkConfig,
}

impl NodeConfig {
    /// Load from a TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|_| ConfigError::Read)?;
        toml::from_str(&text).map_err(|_| ConfigError::Parse)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(_) => return Self::default_with_data_dir(),
            }
        }
        Self::default_with_data_dir()
    }

    fn default_with_data_dir() -> Self {
        Self {
            data_dir: "./data".to_string(),
            metrics_addr: "127.0.0.1:9600".to_string(),
            store: StoreTuning::default(),
            network: NetworkConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml_src = r#"
            data_dir = "/srv/agoranet/data"

            [store]
            purge_age_days = 5
        "#;
        let cfg: NodeConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.data_dir, "/srv/agoranet/data");
        assert_eq!(cfg.store.purge_age_days, 5);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.store.check_ttl_interval_sec, 60);
        assert_eq!(cfg.network.gossip_topic, "agoranet-store-v1");
    }

    #[test]
    fn purge_age_converts_to_millis() {
        let tuning = StoreTuning::default();
        assert_eq!(tuning.purge_age_ms(), 10 * 24 * 60 * 60 * 1000);
    }
}
