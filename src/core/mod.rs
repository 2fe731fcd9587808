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

//! The replicated data store: crypto primitives, payload catalogue, wire
//! messages, storage engine, get-data reconciliation and persistence.

pub mod crypto;
pub mod get_data;
pub mod interfaces;
pub mod listeners;
pub mod messages;
pub mod payload;
pub mod persistence;
pub mod security;
pub mod storage;
pub mod store;
