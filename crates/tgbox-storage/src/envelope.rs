//! On-storage formats of the reference backend.
//!
//! Remote layout under a box prefix:
//! ```text
//! {prefix}/box.json                      BoxHeader
//! {prefix}/files/{id:020}.json           RecordEnvelope
//! {prefix}/blobs/{id:020}/{block:08}     sealed content block
//! {prefix}/log/{millis}-{writer}-{seq}-{id}.json  LogEntry
//! ```
//!
//! Log names sort by time, then by writer. Entries of one writer keep their
//! write order; entries of different writers within the same millisecond
//! are ordered by writer id only, so cross-writer order is best-effort.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use tgbox_core::{pack_cattrs, unpack_cattrs, BoxFile, EncryptedRecord, FileRecord};
use tgbox_crypto::{open, seal, BoxKeys, SALT_SIZE};

use crate::error::{BoxError, BoxResult};

pub const BOX_FORMAT: &str = "tgbox";
pub const BOX_FORMAT_VERSION: u32 = 1;

const KEY_CHECK_AAD: &[u8] = b"tgbox/key-check";
const RECORD_AAD: &[u8] = b"tgbox/record";

/// `box.json`: readable without the key, except for `key_check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxHeader {
    pub format: String,
    pub version: u32,
    pub name: String,
    /// Hex; the base key is Argon2id(phrase, salt)
    pub box_salt: String,
    pub block_size: u64,
    /// Next record id to hand out; ids are never reused
    pub next_id: u64,
    /// Whether box members may read the activity log
    pub log_readable: bool,
    /// Salt sealed with the record key; opens only with the right key
    pub key_check: String,
    pub created: i64,
}

impl BoxHeader {
    pub fn new(
        name: &str,
        salt: &[u8; SALT_SIZE],
        keys: &BoxKeys,
        block_size: u64,
        log_readable: bool,
    ) -> BoxResult<Self> {
        let check = seal(keys.record.as_bytes(), KEY_CHECK_AAD, salt)
            .map_err(|e| anyhow::anyhow!("sealing key check: {e}"))?;
        Ok(Self {
            format: BOX_FORMAT.into(),
            version: BOX_FORMAT_VERSION,
            name: name.into(),
            box_salt: hex::encode(salt),
            block_size,
            next_id: 1,
            log_readable,
            key_check: B64.encode(check),
            created: chrono::Utc::now().timestamp(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> BoxResult<Self> {
        let header: BoxHeader = serde_json::from_slice(bytes)?;
        if header.format != BOX_FORMAT {
            return Err(BoxError::NotABox(format!("format tag `{}`", header.format)));
        }
        if header.version > BOX_FORMAT_VERSION {
            return Err(BoxError::UnsupportedVersion {
                found: header.version,
                supported: BOX_FORMAT_VERSION,
            });
        }
        Ok(header)
    }

    pub fn salt(&self) -> BoxResult<[u8; SALT_SIZE]> {
        decode_salt(&self.box_salt)
    }

    /// `WrongKey` unless `keys` were derived from this box's base key.
    pub fn verify(&self, keys: &BoxKeys) -> BoxResult<()> {
        let sealed = B64
            .decode(&self.key_check)
            .map_err(|e| BoxError::NotABox(format!("key check is not base64: {e}")))?;
        let salt = open(keys.record.as_bytes(), KEY_CHECK_AAD, &sealed)
            .map_err(|_| BoxError::WrongKey(format!("box `{}`", self.name)))?;
        if hex::encode(salt) != self.box_salt {
            return Err(BoxError::WrongKey(format!("box `{}`", self.name)));
        }
        Ok(())
    }
}

pub fn decode_salt(text: &str) -> BoxResult<[u8; SALT_SIZE]> {
    let bytes = hex::decode(text).map_err(|e| BoxError::NotABox(format!("bad salt: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| BoxError::NotABox(format!("salt must be {SALT_SIZE} bytes")))
}

/// Metadata fields sealed inside an envelope.
#[derive(Debug, Serialize, Deserialize)]
struct RecordMeta {
    file_name: String,
    file_path: String,
    #[serde(default)]
    mime: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    /// Hex of the packed attribute blob
    #[serde(default)]
    cattrs: String,
    #[serde(default)]
    imported: bool,
    #[serde(default)]
    fingerprint: Option<String>,
}

/// `files/{id}.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEnvelope {
    pub id: u64,
    pub size: u64,
    pub upload_time: i64,
    pub file_salt: String,
    /// Base64 of the sealed `RecordMeta`
    pub meta: String,
}

impl RecordEnvelope {
    pub fn seal(keys: &BoxKeys, record: &FileRecord) -> BoxResult<Self> {
        let meta = RecordMeta {
            file_name: record.file_name.clone(),
            file_path: record.file_path.clone(),
            mime: record.mime.clone(),
            duration: record.duration,
            cattrs: hex::encode(pack_cattrs(&record.cattrs).map_err(anyhow::Error::from)?),
            imported: record.imported,
            fingerprint: record.fingerprint.clone(),
        };
        let plaintext = serde_json::to_vec(&meta)?;
        let sealed = seal(keys.record.as_bytes(), &record_aad(record.id), &plaintext)
            .map_err(|e| anyhow::anyhow!("sealing record {}: {e}", record.id))?;
        Ok(Self {
            id: record.id,
            size: record.size,
            upload_time: record.upload_time,
            file_salt: record.file_salt.clone(),
            meta: B64.encode(sealed),
        })
    }

    /// Decrypted when the key opens the metadata, `Encrypted` otherwise.
    pub fn open(&self, keys: &BoxKeys) -> BoxFile {
        match self.try_open(keys) {
            Some(record) => BoxFile::Decrypted(record),
            None => {
                tracing::debug!(id = self.id, "record metadata did not open");
                BoxFile::Encrypted(EncryptedRecord {
                    id: self.id,
                    size: self.size,
                    upload_time: self.upload_time,
                    file_salt: self.file_salt.clone(),
                })
            }
        }
    }

    fn try_open(&self, keys: &BoxKeys) -> Option<FileRecord> {
        let sealed = B64.decode(&self.meta).ok()?;
        let plaintext = open(keys.record.as_bytes(), &record_aad(self.id), &sealed).ok()?;
        let meta: RecordMeta = serde_json::from_slice(&plaintext).ok()?;
        let cattrs = hex::decode(&meta.cattrs)
            .ok()
            .and_then(|blob| unpack_cattrs(&blob).ok())?;
        Some(FileRecord {
            id: self.id,
            file_name: meta.file_name,
            file_path: meta.file_path,
            size: self.size,
            upload_time: self.upload_time,
            mime: meta.mime,
            duration: meta.duration,
            cattrs,
            file_salt: self.file_salt.clone(),
            imported: meta.imported,
            fingerprint: meta.fingerprint,
        })
    }
}

fn record_aad(id: u64) -> Vec<u8> {
    let mut aad = RECORD_AAD.to_vec();
    aad.extend_from_slice(&id.to_be_bytes());
    aad
}

pub fn header_path(prefix: &str) -> String {
    format!("{prefix}/box.json")
}

pub fn files_dir(prefix: &str) -> String {
    format!("{prefix}/files/")
}

pub fn record_path(prefix: &str, id: u64) -> String {
    format!("{prefix}/files/{id:020}.json")
}

pub fn block_path(prefix: &str, id: u64, block: u64) -> String {
    format!("{prefix}/blobs/{id:020}/{block:08}")
}

pub fn log_dir(prefix: &str) -> String {
    format!("{prefix}/log/")
}

/// `writer` tells apart handles writing into the same box, so two of them
/// never produce the same name for the same millisecond and sequence.
pub fn log_path(prefix: &str, millis: i64, writer: u64, seq: u64, id: u64) -> String {
    format!("{prefix}/log/{millis:020}-{writer:016x}-{seq:010}-{id:020}.json")
}

/// Id from a `files/` entry name, `None` for anything else.
pub fn parse_record_name(name: &str) -> Option<u64> {
    name.strip_suffix(".json")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgbox_core::CAttrs;
    use tgbox_crypto::{derive_box_keys, BaseKey};

    fn keys(b: u8) -> BoxKeys {
        derive_box_keys(&BaseKey::from_bytes([b; 32])).unwrap()
    }

    fn record() -> FileRecord {
        let mut cattrs = CAttrs::new();
        cattrs.insert("comment".into(), b"hi".to_vec());
        FileRecord {
            id: 7,
            file_name: "a.txt".into(),
            file_path: "/docs".into(),
            size: 3,
            upload_time: 100,
            mime: Some("text/plain".into()),
            duration: None,
            cattrs,
            file_salt: "ab".into(),
            imported: false,
            fingerprint: Some("ff".into()),
        }
    }

    #[test]
    fn envelope_opens_with_right_key() {
        let env = RecordEnvelope::seal(&keys(1), &record()).unwrap();
        assert_eq!(env.open(&keys(1)), BoxFile::Decrypted(record()));
    }

    #[test]
    fn envelope_with_wrong_key_stays_encrypted() {
        let env = RecordEnvelope::seal(&keys(1), &record()).unwrap();
        match env.open(&keys(2)) {
            BoxFile::Encrypted(r) => {
                assert_eq!(r.id, 7);
                assert_eq!(r.size, 3);
                assert_eq!(r.file_salt, "ab");
            }
            BoxFile::Decrypted(_) => panic!("wrong key must not decrypt"),
        }
    }

    #[test]
    fn envelope_bound_to_id() {
        let mut env = RecordEnvelope::seal(&keys(1), &record()).unwrap();
        env.id = 8;
        assert!(matches!(env.open(&keys(1)), BoxFile::Encrypted(_)));
    }

    #[test]
    fn header_key_check() {
        let salt = [9u8; SALT_SIZE];
        let header = BoxHeader::new("b", &salt, &keys(1), 1024, true).unwrap();
        assert!(header.verify(&keys(1)).is_ok());
        assert!(matches!(header.verify(&keys(2)), Err(BoxError::WrongKey(_))));
        assert_eq!(header.salt().unwrap(), salt);
    }

    #[test]
    fn header_rejects_newer_version() {
        let mut header = BoxHeader::new("b", &[0; SALT_SIZE], &keys(1), 1024, true).unwrap();
        header.version = BOX_FORMAT_VERSION + 1;
        let bytes = serde_json::to_vec(&header).unwrap();
        assert!(matches!(
            BoxHeader::from_bytes(&bytes),
            Err(BoxError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn record_names() {
        assert_eq!(parse_record_name("00000000000000000042.json"), Some(42));
        assert_eq!(parse_record_name("files/"), None);
    }

    #[test]
    fn log_names_sort_by_time_then_writer() {
        let a = log_path("p", 5, 1, 0, 9);
        let b = log_path("p", 5, 2, 0, 9);
        assert_ne!(a, b);
        assert!(a < b);
        assert!(log_path("p", 6, 0, 0, 1) > log_path("p", 5, u64::MAX, 9, 1));
        assert!(log_path("p", 5, 1, 2, 9) > log_path("p", 5, 1, 1, 9));
    }
}
