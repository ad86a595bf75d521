//! Box key hierarchy: base key → record, index, and content keys

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::kdf::BaseKey;
use crate::KEY_SIZE;

/// A 256-bit key derived from a Box base key. Zeroized on drop.
#[derive(Clone)]
pub struct SubKey {
    bytes: [u8; KEY_SIZE],
}

impl SubKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SubKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Everything needed to read and write one Box.
#[derive(Debug, Clone)]
pub struct BoxKeys {
    /// Seals remote record metadata
    pub record: SubKey,
    /// Seals the local box index file
    pub index: SubKey,
    /// Seals file content blocks
    pub content: SubKey,
}

/// Derive the per-purpose keys of a Box from its base key.
pub fn derive_box_keys(base: &BaseKey) -> anyhow::Result<BoxKeys> {
    Ok(BoxKeys {
        record: SubKey::from_bytes(hkdf_derive(base.as_bytes(), b"tgbox-record")?),
        index: SubKey::from_bytes(hkdf_derive(base.as_bytes(), b"tgbox-index")?),
        content: SubKey::from_bytes(hkdf_derive(base.as_bytes(), b"tgbox-content")?),
    })
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
fn hkdf_derive(ikm: &[u8; KEY_SIZE], info: &[u8]) -> anyhow::Result<[u8; KEY_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(info, &mut okm)
        .map_err(|e| anyhow::anyhow!("HKDF expand failed: {e}"))?;
    Ok(okm)
}
