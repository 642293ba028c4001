//! Field-level encryption for sensitive free text
//!
//! Stateless authenticated encryption (XChaCha20-Poly1305) over
//! caller-supplied per-tenant keys. The engine holds no key store;
//! listing paths return ciphertext tokens and plaintext is only
//! reachable through the explicit `decrypt` call. A tampered or
//! wrong-key token fails closed, never returns garbage.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

/// Algorithm identifier carried in every token
pub const ALGORITHM: &str = "xchacha20poly1305";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

/// Failed decryption; fails closed, no partial plaintext
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptionError {
    /// Token was produced by an unknown algorithm
    #[error("Unsupported algorithm: {alg}")]
    UnsupportedAlgorithm { alg: String },

    /// Token was encrypted under a different tenant key
    #[error("Token key id {token} does not match the supplied key")]
    KeyMismatch { token: String },

    /// Token structure could not be parsed
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Key material could not be decoded
    #[error("Invalid key encoding")]
    InvalidKey,

    /// Authentication failed: wrong key or tampered ciphertext
    #[error("Decryption failed (wrong key or tampered token)")]
    Failed,
}

/// A per-tenant symmetric key, zeroized on drop
pub struct TenantKey([u8; KEY_LEN]);

impl std::fmt::Debug for TenantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TenantKey").field(&"<redacted>").finish()
    }
}

impl TenantKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        TenantKey(key)
    }

    /// Deterministically derive a key from a passphrase and salt
    pub fn derive(passphrase: &str, salt: &[u8]) -> Self {
        let mut material = Vec::with_capacity(passphrase.len() + salt.len());
        material.extend_from_slice(passphrase.as_bytes());
        material.extend_from_slice(salt);
        let key = blake3::derive_key("powermap tenant key v1", &material);
        material.zeroize();
        TenantKey(key)
    }

    /// Reconstruct a key from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        TenantKey(bytes)
    }

    /// Export the key for caller-side storage
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Import a key exported with `to_base64`
    pub fn from_base64(encoded: &str) -> Result<Self, DecryptionError> {
        let raw = BASE64
            .decode(encoded.trim())
            .map_err(|_| DecryptionError::InvalidKey)?;
        let bytes: [u8; KEY_LEN] = raw.try_into().map_err(|_| DecryptionError::InvalidKey)?;
        Ok(TenantKey(bytes))
    }

    /// Short fingerprint identifying this key in tokens.
    /// Derived from a hash; reveals nothing about the key itself.
    pub fn key_id(&self) -> String {
        blake3::hash(&self.0).to_hex()[..16].to_string()
    }
}

impl Drop for TenantKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Opaque encrypted field token; never contains plaintext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedField {
    pub alg: String,
    pub key_id: String,
    /// base64(nonce || ciphertext)
    pub ciphertext: String,
}

/// Stateless encrypt/decrypt over caller-supplied tenant keys
pub struct EncryptionService;

impl EncryptionService {
    /// Encrypt plaintext under a tenant key.
    ///
    /// Each call uses a fresh random nonce; encrypting the same
    /// plaintext twice yields different tokens.
    pub fn encrypt(key: &TenantKey, plaintext: &str) -> crate::error::Result<EncryptedField> {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key.0));

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: ALGORITHM.as_bytes(),
                },
            )
            .map_err(|_| anyhow::anyhow!("AEAD encryption failure"))?;

        let mut token = Vec::with_capacity(NONCE_LEN + sealed.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&sealed);

        Ok(EncryptedField {
            alg: ALGORITHM.to_string(),
            key_id: key.key_id(),
            ciphertext: BASE64.encode(token),
        })
    }

    /// Decrypt a token with a tenant key. Fails closed on any mismatch.
    pub fn decrypt(key: &TenantKey, field: &EncryptedField) -> Result<String, DecryptionError> {
        if field.alg != ALGORITHM {
            return Err(DecryptionError::UnsupportedAlgorithm {
                alg: field.alg.clone(),
            });
        }
        if field.key_id != key.key_id() {
            return Err(DecryptionError::KeyMismatch {
                token: field.key_id.clone(),
            });
        }

        let token = BASE64
            .decode(&field.ciphertext)
            .map_err(|e| DecryptionError::MalformedToken(e.to_string()))?;
        if token.len() <= NONCE_LEN {
            return Err(DecryptionError::MalformedToken(
                "token shorter than nonce".to_string(),
            ));
        }
        let (nonce, sealed) = token.split_at(NONCE_LEN);

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key.0));
        let plaintext = cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: ALGORITHM.as_bytes(),
                },
            )
            .map_err(|_| DecryptionError::Failed)?;

        String::from_utf8(plaintext).map_err(|_| DecryptionError::Failed)
    }
}
