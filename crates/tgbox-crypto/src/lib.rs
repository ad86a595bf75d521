//! tgbox-crypto: symmetric primitives used by tgbox-cli
//!
//! Key hierarchy:
//! ```text
//! Session secret (env var)
//!   └── State key = SHA-256(secret)             → seals the session state file
//!       └── file name = b64url(SHA-256(secret || state key)[..16])
//!
//! Box phrase + box salt
//!   └── Base key (256-bit, Argon2id)
//!       ├── Record key  (HKDF, domain="tgbox-record")  → seals remote record metadata
//!       ├── Index key   (HKDF, domain="tgbox-index")   → seals the local box index
//!       └── Content key (HKDF, domain="tgbox-content") → seals file content blocks
//! ```
//!
//! Every sealed blob is `[24-byte nonce][ciphertext][16-byte tag]`
//! (XChaCha20-Poly1305).

pub mod block;
pub mod codec;
pub mod kdf;
pub mod keys;

pub use block::{decrypt_block, encrypt_block};
pub use codec::{open, seal, state_file_name, CodecError, StateCodec};
pub use kdf::{derive_state_key, make_basekey, BaseKey, KdfParams, StateKey};
pub use keys::{derive_box_keys, BoxKeys, SubKey};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a Box salt in bytes
pub const SALT_SIZE: usize = 16;
