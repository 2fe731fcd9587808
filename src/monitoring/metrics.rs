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

//! Prometheus metrics for the storage engine and the P2P transport.
//!
//! Rejection counters are a single `IntCounterVec` labeled by `operation`
//! and `reason` rather than one `IntCounter` per failure mode, since the
//! §7 error-handling table enumerates enough (operation, reason) pairs
//! that a flat counter per pair would be unwieldy to add to.

use prometheus::{IntCounterVec, IntGauge, Opts, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A prometheus metric failed to construct or register (duplicate
    /// name, invalid label).
    #[error("prometheus")]
    Prom,
}

/// Metrics container, registered once at startup and shared behind an
/// `Arc` with the storage engine and the transport layer.
#[derive(Clone)]
pub struct Metrics {
    /// Registry exposed by the `/metrics` HTTP endpoint.
    pub registry: Registry,

    /// Rejections across every mutation path, labeled `operation` (add,
    /// remove, mailbox_remove, refresh, append_only) and `reason`
    /// (replay, regression, expired, bad_signature, ...).
    pub rejections_total: IntCounterVec,
    /// Live entries in the main protected-entry map.
    pub protected_entries: IntGauge,
    /// Entries in the append-only store.
    pub append_only_entries: IntGauge,
    /// Entries in the sequence-number map.
    pub sequence_map_size: IntGauge,
    /// Entries in the removed-payloads set.
    pub removed_payloads_size: IntGauge,
    /// Currently connected peers.
    pub p2p_peers: IntGauge,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let rejections_total = IntCounterVec::new(
            Opts::new("agoranet_rejections_total", "Rejected store operations"),
            &["operation", "reason"],
        )
        .map_err(|_| MetricsError::Prom)?;
        let protected_entries = IntGauge::new("agoranet_protected_entries", "Live protected entries")
            .map_err(|_| MetricsError::Prom)?;
        let append_only_entries =
            IntGauge::new("agoranet_append_only_entries", "Append-only entries held")
                .map_err(|_| MetricsError::Prom)?;
        let sequence_map_size =
            IntGauge::new("agoranet_sequence_map_size", "Entries in the sequence-number map")
                .map_err(|_| MetricsError::Prom)?;
        let removed_payloads_size = IntGauge::new(
            "agoranet_removed_payloads_size",
            "Entries in the removed-payloads set",
        )
        .map_err(|_| MetricsError::Prom)?;
        let p2p_peers =
            IntGauge::new("agoranet_p2p_peers", "Connected peers").map_err(|_| MetricsError::Prom)?;

        registry
            .register(Box::new(rejections_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(protected_entries.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(append_only_entries.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(sequence_map_size.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(removed_payloads_size.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(p2p_peers.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            rejections_total,
            protected_entries,
            append_only_entries,
            sequence_map_size,
            removed_payloads_size,
            p2p_peers,
        })
    }

    /// Record a rejection for `operation` with `reason`.
    pub fn record_rejection(&self, operation: &str, reason: &str) {
        self.rejections_total.with_label_values(&[operation, reason]).inc();
    }

    /// Set the live protected-entry count.
    pub fn set_protected_entries(&self, value: i64) {
        self.protected_entries.set(value);
    }

    /// Set the append-only entry count.
    pub fn set_append_only_entries(&self, value: i64) {
        self.append_only_entries.set(value);
    }

    /// Set the sequence-number map size.
    pub fn set_sequence_map_size(&self, value: i64) {
        self.sequence_map_size.set(value);
    }

    /// Set the removed-payloads set size.
    pub fn set_removed_payloads_size(&self, value: i64) {
        self.removed_payloads_size.set(value);
    }

    /// Set the connected-peer gauge.
    pub fn set_p2p_peers(&self, value: i64) {
        self.p2p_peers.set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_counters_are_labeled_independently() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rejection("add", "replay");
        metrics.record_rejection("add", "replay");
        metrics.record_rejection("remove", "bad_signature");

        assert_eq!(
            metrics.rejections_total.with_label_values(&["add", "replay"]).get(),
            2
        );
        assert_eq!(
            metrics
                .rejections_total
                .with_label_values(&["remove", "bad_signature"])
                .get(),
            1
        );
    }

    #[test]
    fn gauges_reflect_the_last_set_value() {
        let metrics = Metrics::new().unwrap();
        metrics.set_protected_entries(42);
        assert_eq!(metrics.protected_entries.get(), 42);
    }
}
