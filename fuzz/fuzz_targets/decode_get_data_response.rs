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

#![no_main]
#![forbid(unsafe_code)]

use agoranet::core::crypto::hash::decode_canonical_limited;
use agoranet::core::messages::GetDataResponse;
use libfuzzer_sys::fuzz_target;

// The get-data response is the largest message this crate decodes, and
// the one most directly shaped by a remote peer's truncation choices.
// Decoding garbage must fail cleanly rather than panic.
fuzz_target!(|data: &[u8]| {
    let _ = decode_canonical_limited::<GetDataResponse>(data, 16 * 1024 * 1024);
});
