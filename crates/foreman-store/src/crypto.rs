// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::StoreError;

const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher for provider credentials at rest.
///
/// Ciphertext layout: `nonce (12 bytes) || ct+tag`.  A fresh random nonce is
/// generated per encryption, so encrypting the same credential twice yields
/// different blobs.
#[derive(Clone)]
pub struct SecretCipher {
    key: Key<Aes256Gcm>,
}

impl SecretCipher {
    /// Build from a 64-char hex string (32 bytes).
    pub fn from_hex(hex_key: &str) -> Result<Self, StoreError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| StoreError::Crypto(format!("key is not valid hex: {e}")))?;
        if bytes.len() != 32 {
            return Err(StoreError::Crypto(format!(
                "key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self { key: *Key::<Aes256Gcm>::from_slice(&bytes) })
    }

    /// Generate a random key; useful for tests and first-run setup.
    pub fn generate() -> Self {
        Self { key: Aes256Gcm::generate_key(OsRng) }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, StoreError> {
        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ct = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| StoreError::Crypto(format!("encrypt: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    pub fn decrypt(&self, blob: &[u8]) -> Result<String, StoreError> {
        if blob.len() < NONCE_LEN {
            return Err(StoreError::Crypto("ciphertext too short".into()));
        }
        let (nonce, ct) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.key);
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce), ct)
            .map_err(|e| StoreError::Crypto(format!("decrypt: {e}")))?;
        String::from_utf8(plain).map_err(|e| StoreError::Crypto(format!("utf-8: {e}")))
    }
}

/// Hash an API token for storage.  Raw token values never touch the database.
pub fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
