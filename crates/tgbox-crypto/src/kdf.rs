//! Key derivation: session secret → state key, Box phrase → base key

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::{KEY_SIZE, SALT_SIZE};

/// Key that seals the session state file. Zeroized on drop.
#[derive(Clone)]
pub struct StateKey {
    bytes: [u8; KEY_SIZE],
}

impl StateKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for StateKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A 256-bit Box base key derived from the Box phrase via Argon2id.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct BaseKey {
    bytes: [u8; KEY_SIZE],
}

impl BaseKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Rebuild a base key from the raw bytes kept in the session state.
    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            anyhow::anyhow!("base key must be {KEY_SIZE} bytes, got {}", bytes.len())
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for BaseKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for BaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id parameters for `make_basekey`
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// One-way hash of the session secret. Same secret, same key.
pub fn derive_state_key(secret: &SecretString) -> StateKey {
    let digest = Sha256::digest(secret.expose_secret().as_bytes());
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&digest);
    StateKey::from_bytes(bytes)
}

/// Derive a Box base key from a phrase and the Box salt using Argon2id.
pub fn make_basekey(
    phrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> anyhow::Result<BaseKey> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| anyhow::anyhow!("invalid Argon2id params: {e}"))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);
    tracing::debug!(
        mem_cost_kib = params.mem_cost_kib,
        time_cost = params.time_cost,
        "deriving box base key"
    );

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(phrase.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| anyhow::anyhow!("Argon2id KDF failed: {e}"))?;

    Ok(BaseKey::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn state_key_is_deterministic() {
        let a = derive_state_key(&SecretString::from("secret-one"));
        let b = derive_state_key(&SecretString::from("secret-one"));
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn state_key_differs_per_secret() {
        let a = derive_state_key(&SecretString::from("secret-one"));
        let b = derive_state_key(&SecretString::from("secret-two"));
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn basekey_deterministic() {
        let phrase = SecretString::from("correct horse battery staple");
        let salt = [7u8; SALT_SIZE];
        let k1 = make_basekey(&phrase, &salt, &fast_params()).unwrap();
        let k2 = make_basekey(&phrase, &salt, &fast_params()).unwrap();
        assert_eq!(k1, k2, "KDF must be deterministic");
    }

    #[test]
    fn basekey_depends_on_salt() {
        let phrase = SecretString::from("same phrase");
        let k1 = make_basekey(&phrase, &[1u8; SALT_SIZE], &fast_params()).unwrap();
        let k2 = make_basekey(&phrase, &[2u8; SALT_SIZE], &fast_params()).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn basekey_from_slice_checks_length() {
        assert!(BaseKey::from_slice(&[0u8; 31]).is_err());
        assert!(BaseKey::from_slice(&[0u8; KEY_SIZE]).is_ok());
    }

    #[test]
    fn debug_redacts_key_bytes() {
        let key = BaseKey::from_bytes([9u8; KEY_SIZE]);
        assert!(format!("{key:?}").contains("REDACTED"));
    }
}
