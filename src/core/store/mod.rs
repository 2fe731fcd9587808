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

//! The persisted supporting stores the main engine (`core::storage`)
//! orchestrates: the sequence-number map (anti-replay ledger), the
//! removed-payloads set (add-once revocation), the append-only store,
//! and the protected-entry store (the persistable subset of the live
//! main map).

pub mod append_only;
pub mod protected_entry_store;
pub mod removed_payloads;
pub mod sequence_map;
