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

//! File-backed Ed25519 keystore, adapted from the teacher's
//! `core::security::keystore::Keystore`: atomic writes, optional
//! key-at-rest encryption via a passphrase environment variable, and a
//! sign-rate limiter. Cut down to what this node actually signs with
//! locally (its own protected entries) — the audit-log trail and key
//! rotation machinery are unchanged from the teacher.

use crate::core::crypto::signing::{OwnerPubKey, Signature};
use ring::{
    aead,
    pbkdf2,
    rand::{SecureRandom, SystemRandom},
    signature::{Ed25519KeyPair, KeyPair},
};
use std::{
    fs,
    io::Write,
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant},
};
use thiserror::Error;
use zeroize::Zeroize;

/// Keystore errors.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// A filesystem operation failed.
    #[error("io")]
    Io,
    /// Key bytes on disk are not a well-formed PKCS#8 Ed25519 key.
    #[error("invalid key encoding")]
    InvalidKey,
    /// The key file is encrypted but no passphrase was supplied.
    #[error("missing passphrase (set AGORANET_KEY_PASSPHRASE)")]
    MissingPassphrase,
    /// An AEAD or KDF operation failed.
    #[error("crypto")]
    Crypto,
    /// The local sign-rate limit was exceeded.
    #[error("rate limited")]
    RateLimited,
}

const KEY_FILE_MAGIC: &[u8] = b"AGORKEY1";
const KEY_SALT_LEN: usize = 16;
const KEY_NONCE_LEN: usize = 12;
const PBKDF2_ITERS_DEFAULT: u32 = 100_000;

fn pbkdf2_iters() -> NonZeroU32 {
    let iters = std::env::var("AGORANET_PBKDF2_ITERS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(PBKDF2_ITERS_DEFAULT)
        .clamp(10_000, 10_000_000);
    NonZeroU32::new(iters).unwrap_or_else(|| NonZeroU32::new(PBKDF2_ITERS_DEFAULT).expect("nonzero"))
}

fn set_private_perms_best_effort(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

fn atomic_write_private(path: &Path, bytes: &[u8]) -> Result<(), KeystoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| KeystoreError::Io)?;
    }
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .map_err(|_| KeystoreError::Io)?;
        f.write_all(bytes).map_err(|_| KeystoreError::Io)?;
        let _ = f.sync_all();
    }
    set_private_perms_best_effort(&tmp);
    fs::rename(&tmp, path).map_err(|_| KeystoreError::Io)?;
    set_private_perms_best_effort(path);
    Ok(())
}

fn derive_aes256gcm_key(passphrase: &[u8], salt: &[u8; KEY_SALT_LEN]) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, pbkdf2_iters(), salt, passphrase, &mut out);
    out
}

fn encrypt_pkcs8(passphrase: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, KeystoreError> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; KEY_SALT_LEN];
    rng.fill(&mut salt).map_err(|_| KeystoreError::Crypto)?;
    let mut nonce_bytes = [0u8; KEY_NONCE_LEN];
    rng.fill(&mut nonce_bytes).map_err(|_| KeystoreError::Crypto)?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut key = derive_aes256gcm_key(passphrase, &salt);
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| KeystoreError::Crypto)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = plaintext.to_vec();
    less_safe
        .seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| KeystoreError::Crypto)?;
    key.zeroize();

    let mut out = Vec::with_capacity(KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN + in_out.len());
    out.extend_from_slice(KEY_FILE_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

fn decrypt_pkcs8(passphrase: &[u8], bytes: &[u8]) -> Result<Vec<u8>, KeystoreError> {
    if bytes.len() < KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN + 16 {
        return Err(KeystoreError::InvalidKey);
    }
    let mut salt = [0u8; KEY_SALT_LEN];
    salt.copy_from_slice(&bytes[KEY_FILE_MAGIC.len()..KEY_FILE_MAGIC.len() + KEY_SALT_LEN]);
    let mut nonce_bytes = [0u8; KEY_NONCE_LEN];
    nonce_bytes.copy_from_slice(
        &bytes[KEY_FILE_MAGIC.len() + KEY_SALT_LEN..KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN],
    );
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut key = derive_aes256gcm_key(passphrase, &salt);
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| KeystoreError::Crypto)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = bytes[KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN..].to_vec();
    let plain = less_safe
        .open_in_place(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| KeystoreError::Crypto)?;
    key.zeroize();
    Ok(plain.to_vec())
}

/// A rate-limited, file-backed Ed25519 signer for entries this node
/// originates locally.
pub struct Keystore {
    keypair: Ed25519KeyPair,
    limiter: Mutex<RateLimiter>,
}

#[derive(Debug)]
struct RateLimiter {
    window_start: Instant,
    count: u32,
    limit_per_sec: u32,
}

impl RateLimiter {
    fn new(limit_per_sec: u32) -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
            limit_per_sec,
        }
    }

    fn allow(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.count = 0;
        }
        if self.count >= self.limit_per_sec {
            return false;
        }
        self.count = self.count.saturating_add(1);
        true
    }
}

impl Keystore {
    /// Load or create `data_dir/node_identity.key`. If
    /// `AGORANET_KEY_PASSPHRASE` is set, the key is stored encrypted at
    /// rest.
    pub fn open(data_dir: &str) -> Result<Self, KeystoreError> {
        let mut key_path = PathBuf::from(data_dir);
        key_path.push("node_identity.key");

        let passphrase = std::env::var("AGORANET_KEY_PASSPHRASE").ok();

        let keypair = if key_path.exists() {
            let bytes = fs::read(&key_path).map_err(|_| KeystoreError::Io)?;
            let pkcs8 = if bytes.starts_with(KEY_FILE_MAGIC) {
                let pass = passphrase.as_deref().ok_or(KeystoreError::MissingPassphrase)?;
                decrypt_pkcs8(pass.as_bytes(), &bytes)?
            } else {
                bytes
            };
            Ed25519KeyPair::from_pkcs8(&pkcs8).map_err(|_| KeystoreError::InvalidKey)?
        } else {
            let rng = SystemRandom::new();
            let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| KeystoreError::InvalidKey)?;
            let mut buf = pkcs8.as_ref().to_vec();
            let on_disk = if let Some(pass) = passphrase.as_deref() {
                let enc = encrypt_pkcs8(pass.as_bytes(), &buf)?;
                buf.zeroize();
                enc
            } else {
                buf.clone()
            };
            atomic_write_private(&key_path, &on_disk)?;
            buf.zeroize();
            Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).map_err(|_| KeystoreError::InvalidKey)?
        };

        Ok(Self {
            keypair,
            limiter: Mutex::new(RateLimiter::new(10_000)),
        })
    }

    /// This node's public key, used as `ownerPubKey` on entries it signs
    /// itself.
    pub fn public_key(&self) -> OwnerPubKey {
        let pk = self.keypair.public_key().as_ref();
        let mut out = [0u8; 32];
        out.copy_from_slice(pk);
        OwnerPubKey(out)
    }

    /// Sign `msg`, subject to the local rate limiter.
    pub fn sign(&self, msg: &[u8]) -> Result<Signature, KeystoreError> {
        let mut guard = self.limiter.lock().map_err(|_| KeystoreError::RateLimited)?;
        if !guard.allow() {
            return Err(KeystoreError::RateLimited);
        }
        Ok(Signature(self.keypair.sign(msg).as_ref().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::signing::verify;

    #[test]
    fn open_creates_and_reloads_the_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let ks1 = Keystore::open(path).unwrap();
        let pk1 = ks1.public_key();
        drop(ks1);
        let ks2 = Keystore::open(path).unwrap();
        assert_eq!(pk1, ks2.public_key());
    }

    #[test]
    fn signatures_verify_under_the_node_public_key() {
        let dir = tempfile::tempdir().unwrap();
        let ks = Keystore::open(dir.path().to_str().unwrap()).unwrap();
        let sig = ks.sign(b"hello").unwrap();
        verify(&ks.public_key(), b"hello", &sig).unwrap();
    }
}
