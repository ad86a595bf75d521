//! Per-block XChaCha20-Poly1305 encryption of file content
//!
//! Encrypted block format (binary):
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! AAD = file_id (8 bytes, big-endian) || block_index (8 bytes, big-endian)
//! ```
//!
//! The AAD binds each block to its file and position, so blocks cannot be
//! reordered or moved between files. Blocks are independent, which lets a
//! download resume at any block boundary.

use crate::codec::{open, seal};
use crate::keys::SubKey;

/// Encrypt one content block.
pub fn encrypt_block(
    content_key: &SubKey,
    file_id: u64,
    block_index: u64,
    plaintext: &[u8],
) -> anyhow::Result<Vec<u8>> {
    seal(content_key.as_bytes(), &build_aad(file_id, block_index), plaintext)
        .map_err(|e| anyhow::anyhow!("block encryption failed: {e}"))
}

/// Decrypt one content block.
pub fn decrypt_block(
    content_key: &SubKey,
    file_id: u64,
    block_index: u64,
    encrypted: &[u8],
) -> anyhow::Result<Vec<u8>> {
    open(content_key.as_bytes(), &build_aad(file_id, block_index), encrypted).map_err(|e| {
        anyhow::anyhow!("block {block_index} of file {file_id}: {e}")
    })
}

fn build_aad(file_id: u64, block_index: u64) -> [u8; 16] {
    let mut aad = [0u8; 16];
    aad[..8].copy_from_slice(&file_id.to_be_bytes());
    aad[8..].copy_from_slice(&block_index.to_be_bytes());
    aad
}
