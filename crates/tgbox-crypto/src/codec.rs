//! StateCodec: seals the session state blob and locates its file.
//!
//! Sealed format (binary):
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! AAD = "tgbox-cli/session"
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::kdf::{derive_state_key, StateKey};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

const STATE_AAD: &[u8] = b"tgbox-cli/session";

/// Bytes of the locator hash kept in the file name
const LOCATOR_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CodecError {
    /// Ciphertext too short to hold a nonce and tag
    #[error("sealed blob too short: {0} bytes (minimum {min})", min = NONCE_SIZE + TAG_SIZE)]
    Truncated(usize),

    /// Authentication failed: wrong key or tampered data
    #[error("decryption failed: wrong key or corrupted data")]
    Decryption,

    #[error("encryption failed: {0}")]
    Encryption(String),
}

/// Seal `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &[u8; KEY_SIZE], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CodecError::Encryption(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Open a blob produced by [`seal`] with the same key and AAD.
pub fn open(key: &[u8; KEY_SIZE], aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CodecError::Truncated(sealed.len()));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.into());

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CodecError::Decryption)
}

/// File name for the state of `secret`: stable across runs, no registry needed.
pub fn state_file_name(secret: &SecretString, key: &StateKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.expose_secret().as_bytes());
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    format!(
        "tgbox-cli.{}.session",
        URL_SAFE_NO_PAD.encode(&digest[..LOCATOR_LEN])
    )
}

/// Symmetric codec for the session state blob, keyed by the session secret.
#[derive(Debug, Clone)]
pub struct StateCodec {
    key: StateKey,
    file_name: String,
}

impl StateCodec {
    pub fn new(secret: &SecretString) -> Self {
        let key = derive_state_key(secret);
        let file_name = state_file_name(secret, &key);
        Self { key, file_name }
    }

    /// File name (not path) of the state file for this secret.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        seal(self.key.as_bytes(), STATE_AAD, plaintext)
    }

    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
        open(self.key.as_bytes(), STATE_AAD, sealed)
    }
}
