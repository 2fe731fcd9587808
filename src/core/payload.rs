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

//! Payload catalogue and capability model.
//!
//! The original design models capabilities via interface-implementation
//! testing (is this payload an `AddOncePayload`? a `DateTolerantPayload`?).
//! Here the payload universe is a closed, tagged enum and capabilities are
//! a plain data lookup (`meta()`), so the truncation pipeline and the
//! add/remove paths dispatch on fields instead of downcasting.

use crate::core::crypto::signing::OwnerPubKey;
use serde::{Deserialize, Serialize};

/// Relative priority used by the get-data truncation pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Bypasses both size and count budgets.
    High,
    /// Included unconditionally, ahead of the size-limited LOW tiers.
    Mid,
    /// Subject to size and count truncation.
    Low,
}

/// A capability a peer must advertise to be sent a given payload.
pub type Capability = &'static str;

/// Self-reported validity window for a date-tolerant append-only payload.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DateTolerance {
    /// Payload-declared timestamp, ms since Unix epoch.
    pub declared_at_ms: u64,
    /// Maximum allowed absolute drift from "now", in ms.
    pub tolerance_ms: u64,
}

impl DateTolerance {
    /// Whether `declared_at_ms` is within `tolerance_ms` of `now_ms`.
    pub fn is_within_tolerance(&self, now_ms: u64) -> bool {
        let diff = if now_ms >= self.declared_at_ms {
            now_ms - self.declared_at_ms
        } else {
            self.declared_at_ms - now_ms
        };
        diff <= self.tolerance_ms
    }
}

/// Metadata controlling date-sorted truncation (step 3 of the five-step
/// truncation pipeline): a timestamp used for ordering, and the maximum
/// number of such items a single peer should keep live.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DateSortedMeta {
    /// Timestamp used to order items oldest-first for pruning.
    pub timestamp_ms: u64,
    /// Maximum number of this payload class to retain; truncation drops
    /// the oldest beyond this count.
    pub max_items: usize,
}

/// Declared behavior of a protected payload, looked up once per
/// add/remove/truncation decision rather than dispatched via trait object.
#[derive(Clone, Copy, Debug)]
pub struct ProtectedPayloadMeta {
    /// Get-data response priority.
    pub priority: Priority,
    /// Capabilities a receiving peer must advertise.
    pub required_capabilities: &'static [Capability],
    /// Time-to-live before the entry expires absent a refresh.
    pub ttl_ms: u64,
    /// Once removed, this payload's hash is permanently banned from
    /// future adds.
    pub is_add_once: bool,
    /// Should be written through to the protected-entry store.
    pub is_persistable: bool,
    /// TTL refresh is tied to the owner's connection liveness; back-dated
    /// on unintended disconnect.
    pub is_requires_owner_online: bool,
    /// Present only for payloads subject to date-sorted truncation.
    pub date_sorted: Option<DateSortedMeta>,
}

/// A classified-listing-style payload: protected, persistable, bounded by
/// `max_items` per owner via date-sorted truncation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TextListingPayload {
    /// Free-form listing body (already validated upstream; out of scope
    /// here per the generic-rules-only Non-goal).
    pub body: String,
    /// Listing creation time, used for date-sorted truncation ordering.
    pub listed_at_ms: u64,
}

/// A mailbox message payload: protected, removable only by the declared
/// receiver (see `StorageEntry::Mailbox`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MailboxMessagePayload {
    /// Receiver public key this message is addressed to. Duplicated here
    /// (in addition to the wrapper's `receiver_pub_key`) so the payload
    /// hash itself commits to the intended recipient.
    pub receiver: OwnerPubKey,
    /// Encrypted message body.
    pub ciphertext: Vec<u8>,
}

/// Closed set of protected payload kinds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ProtectedPayload {
    /// See [`TextListingPayload`].
    TextListing(TextListingPayload),
    /// See [`MailboxMessagePayload`].
    MailboxMessage(MailboxMessagePayload),
}

/// Default TTLs, in milliseconds.
pub const LISTING_TTL_MS: u64 = 30 * 24 * 60 * 60 * 1000; // 30 days
/// Mailbox messages outlive the owner's connection; no owner-liveness tie.
pub const MAILBOX_TTL_MS: u64 = 15 * 24 * 60 * 60 * 1000; // 15 days
/// Default bound on live listings kept per truncation pass.
pub const LISTING_MAX_ITEMS: usize = 10_000;

const CAP_MAILBOX: Capability = "mailbox";

impl ProtectedPayload {
    /// Declared behavior for this payload.
    pub fn meta(&self) -> ProtectedPayloadMeta {
        match self {
            ProtectedPayload::TextListing(p) => ProtectedPayloadMeta {
                priority: Priority::Low,
                required_capabilities: &[],
                ttl_ms: LISTING_TTL_MS,
                is_add_once: false,
                is_persistable: true,
                is_requires_owner_online: true,
                date_sorted: Some(DateSortedMeta {
                    timestamp_ms: p.listed_at_ms,
                    max_items: LISTING_MAX_ITEMS,
                }),
            },
            ProtectedPayload::MailboxMessage(_) => ProtectedPayloadMeta {
                priority: Priority::Mid,
                required_capabilities: &[CAP_MAILBOX],
                ttl_ms: MAILBOX_TTL_MS,
                is_add_once: false,
                is_persistable: true,
                is_requires_owner_online: false,
                date_sorted: None,
            },
        }
    }
}

/// Declared behavior of an append-only payload.
#[derive(Clone, Copy, Debug)]
pub struct AppendOnlyMeta {
    /// Get-data response priority.
    pub priority: Priority,
    /// Capabilities a receiving peer must advertise.
    pub required_capabilities: &'static [Capability],
    /// Apply at most once per node startup (except on truncated
    /// responses, which signal an incomplete first pass).
    pub is_process_once: bool,
    /// Protocol version this payload was introduced in; historical stores
    /// use this to answer "data since version V".
    pub version: u32,
    /// Self-reported validity window, if this payload class is
    /// date-tolerant.
    pub date_tolerance: Option<DateTolerance>,
}

/// A large immutable blob (e.g. a listing attachment), gated behind the
/// `blob-transfer` capability and applied at most once per startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttachmentBlobPayload {
    /// Opaque blob bytes.
    pub bytes: Vec<u8>,
    /// Self-reported creation time for date-tolerance checks.
    pub created_at_ms: u64,
}

/// Closed set of append-only payload kinds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AppendOnlyPayload {
    /// See [`AttachmentBlobPayload`].
    AttachmentBlob(AttachmentBlobPayload),
}

const CAP_BLOB_TRANSFER: Capability = "blob-transfer";
/// Attachment dates must self-report within one day of the responder's
/// clock.
pub const ATTACHMENT_DATE_TOLERANCE_MS: u64 = 24 * 60 * 60 * 1000;
/// Attachments were introduced in protocol version 1.
pub const ATTACHMENT_VERSION: u32 = 1;

impl AppendOnlyPayload {
    /// Declared behavior for this payload.
    pub fn meta(&self) -> AppendOnlyMeta {
        match self {
            AppendOnlyPayload::AttachmentBlob(p) => AppendOnlyMeta {
                priority: Priority::Low,
                required_capabilities: &[CAP_BLOB_TRANSFER],
                is_process_once: true,
                version: ATTACHMENT_VERSION,
                date_tolerance: Some(DateTolerance {
                    declared_at_ms: p.created_at_ms,
                    tolerance_ms: ATTACHMENT_DATE_TOLERANCE_MS,
                }),
            },
        }
    }
}

/// Capabilities a peer advertises; used by `shouldTransmit` gating.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PeerCapabilities(pub std::collections::BTreeSet<String>);

impl PeerCapabilities {
    /// Whether this peer's capability set is a superset of `required`.
    pub fn supports_all(&self, required: &[Capability]) -> bool {
        required.iter().all(|c| self.0.contains(*c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_tolerance_accepts_within_window() {
        let dt = DateTolerance {
            declared_at_ms: 1_000_000,
            tolerance_ms: 1_000,
        };
        assert!(dt.is_within_tolerance(1_000_500));
        assert!(!dt.is_within_tolerance(1_002_000));
    }

    #[test]
    fn peer_capabilities_gate_mailbox() {
        let mut caps = PeerCapabilities::default();
        let payload = ProtectedPayload::MailboxMessage(MailboxMessagePayload {
            receiver: OwnerPubKey([1u8; 32]),
            ciphertext: vec![],
        });
        let meta = payload.meta();
        assert!(!caps.supports_all(meta.required_capabilities));
        caps.0.insert("mailbox".to_string());
        assert!(caps.supports_all(meta.required_capabilities));
    }
}
