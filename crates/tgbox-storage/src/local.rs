//! Local box: one encrypted index file.
//!
//! On disk (JSON):
//! ```text
//! { "format": "tgbox-localbox", "version": 1, "box_salt": hex, "sealed": b64 }
//! ```
//! `sealed` is the serialized [`LocalIndex`] sealed with the box index key.
//! The salt stays readable so a phrase can be turned into the base key
//! before anything is decrypted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};

use tgbox_core::{write_private_atomic, BoxFile, FileRecord};
use tgbox_crypto::{derive_box_keys, make_basekey, open, seal, BaseKey, BoxKeys, KdfParams, SALT_SIZE};
use tgbox_filter::in_scope;

use crate::adapter::{IdQuery, LocalBox, PreparedFile, RecordSource, SourceFile};
use crate::envelope::decode_salt;
use crate::error::{BoxError, BoxResult};
use crate::operator::StorageRoot;

const LOCAL_FORMAT: &str = "tgbox-localbox";
const LOCAL_VERSION: u32 = 1;
const INDEX_AAD: &[u8] = b"tgbox/localbox";

/// Where the remote half of a box lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLocation {
    #[serde(flatten)]
    pub storage: StorageRoot,
    pub prefix: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LocalBoxFile {
    format: String,
    version: u32,
    box_salt: String,
    sealed: String,
}

/// Decrypted contents of the local box file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalIndex {
    pub name: String,
    pub remote: RemoteLocation,
    #[serde(default)]
    pub records: BTreeMap<u64, FileRecord>,
}

struct Inner {
    index: LocalIndex,
    dirty: bool,
}

pub struct FileLocalBox {
    path: PathBuf,
    box_salt: [u8; SALT_SIZE],
    keys: BoxKeys,
    inner: RwLock<Inner>,
}

impl FileLocalBox {
    /// Create a new, empty local box file. Fails when `path` exists.
    pub async fn make(
        path: &Path,
        name: &str,
        remote: RemoteLocation,
        box_salt: [u8; SALT_SIZE],
        keys: BoxKeys,
    ) -> BoxResult<Self> {
        if path.exists() {
            return Err(BoxError::Other(anyhow::anyhow!(
                "{} already exists",
                path.display()
            )));
        }
        let local = Self {
            path: path.to_path_buf(),
            box_salt,
            keys,
            inner: RwLock::new(Inner {
                index: LocalIndex {
                    name: name.to_string(),
                    remote,
                    records: BTreeMap::new(),
                },
                dirty: true,
            }),
        };
        local.commit().await?;
        info!(path = %path.display(), name, "local box created");
        Ok(local)
    }

    /// Open with a stored base key.
    pub async fn open(path: &Path, basekey: &BaseKey) -> BoxResult<Self> {
        let file = read_box_file(path).await?;
        let box_salt = decode_salt(&file.box_salt)?;
        let keys = derive_box_keys(basekey)?;

        let sealed = B64
            .decode(&file.sealed)
            .map_err(|e| BoxError::NotABox(format!("{}: {e}", path.display())))?;
        let plaintext = open(keys.index.as_bytes(), INDEX_AAD, &sealed)
            .map_err(|_| BoxError::WrongKey(path.display().to_string()))?;
        let index: LocalIndex = serde_json::from_slice(&plaintext)?;

        debug!(path = %path.display(), records = index.records.len(), "local box opened");
        Ok(Self {
            path: path.to_path_buf(),
            box_salt,
            keys,
            inner: RwLock::new(Inner {
                index,
                dirty: false,
            }),
        })
    }

    /// Open with the box phrase; also returns the derived base key so the
    /// session can store it.
    pub async fn open_with_phrase(
        path: &Path,
        phrase: &SecretString,
        params: &KdfParams,
    ) -> BoxResult<(Self, BaseKey)> {
        let salt = Self::read_salt(path).await?;
        let basekey = make_basekey(phrase, &salt, params)?;
        let local = Self::open(path, &basekey).await?;
        Ok((local, basekey))
    }

    pub async fn read_salt(path: &Path) -> BoxResult<[u8; SALT_SIZE]> {
        decode_salt(&read_box_file(path).await?.box_salt)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn box_salt(&self) -> &[u8; SALT_SIZE] {
        &self.box_salt
    }

    pub fn keys(&self) -> &BoxKeys {
        &self.keys
    }

    pub async fn name(&self) -> String {
        self.inner.read().await.index.name.clone()
    }

    pub async fn remote_location(&self) -> RemoteLocation {
        self.inner.read().await.index.remote.clone()
    }

    /// Upload dedup fingerprint: `sha256(box path ++ box salt)` as hex.
    pub fn fingerprint(&self, box_path: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(box_path.as_bytes());
        hasher.update(self.box_salt);
        hex::encode(hasher.finalize())
    }
}

async fn read_box_file(path: &Path) -> BoxResult<LocalBoxFile> {
    let bytes = tokio::fs::read(path).await?;
    let file: LocalBoxFile = serde_json::from_slice(&bytes)
        .map_err(|e| BoxError::NotABox(format!("{}: {e}", path.display())))?;
    if file.format != LOCAL_FORMAT {
        return Err(BoxError::NotABox(path.display().to_string()));
    }
    if file.version > LOCAL_VERSION {
        return Err(BoxError::UnsupportedVersion {
            found: file.version,
            supported: LOCAL_VERSION,
        });
    }
    Ok(file)
}

#[async_trait]
impl RecordSource for FileLocalBox {
    async fn file_ids(&self, query: &IdQuery) -> BoxResult<Vec<u64>> {
        let inner = self.inner.read().await;
        let ids = inner
            .index
            .records
            .values()
            .filter(|r| {
                query.scopes.is_empty()
                    || query
                        .scopes
                        .iter()
                        .any(|s| in_scope(&r.file_path, s, query.non_recursive_scope))
            })
            .map(|r| r.id)
            .collect();
        Ok(query.select(ids))
    }

    async fn get_file(&self, id: u64) -> BoxResult<Option<BoxFile>> {
        let inner = self.inner.read().await;
        Ok(inner.index.records.get(&id).cloned().map(BoxFile::Decrypted))
    }

    async fn last_file_id(&self) -> BoxResult<Option<u64>> {
        let inner = self.inner.read().await;
        Ok(inner.index.records.keys().next_back().copied())
    }

    async fn files_total(&self) -> BoxResult<u64> {
        Ok(self.inner.read().await.index.records.len() as u64)
    }

    fn supports_scope(&self) -> bool {
        true
    }
}

#[async_trait]
impl LocalBox for FileLocalBox {
    async fn import_file(&self, record: FileRecord) -> BoxResult<()> {
        let mut inner = self.inner.write().await;
        inner.index.records.insert(record.id, record);
        inner.dirty = true;
        Ok(())
    }

    async fn update_file(&self, record: FileRecord) -> BoxResult<()> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .index
            .records
            .get_mut(&record.id)
            .ok_or(BoxError::LocalFileNotFound(record.id))?;
        *slot = record;
        inner.dirty = true;
        Ok(())
    }

    async fn delete_file(&self, id: u64) -> BoxResult<bool> {
        let mut inner = self.inner.write().await;
        let removed = inner.index.records.remove(&id).is_some();
        inner.dirty |= removed;
        Ok(removed)
    }

    async fn find_fingerprint(&self, fingerprint: &str) -> BoxResult<Option<FileRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .index
            .records
            .values()
            .find(|r| r.fingerprint.as_deref() == Some(fingerprint))
            .cloned())
    }

    async fn find_by_path(
        &self,
        file_path: &str,
        file_name: &str,
    ) -> BoxResult<Option<FileRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .index
            .records
            .values()
            .find(|r| r.file_name == file_name && r.file_path == file_path)
            .cloned())
    }

    async fn prepare_file(&self, source: SourceFile) -> BoxResult<PreparedFile> {
        let fingerprint = self.fingerprint(&source.box_path());
        if self.find_fingerprint(&fingerprint).await?.is_some() {
            return Err(BoxError::FingerprintExists(fingerprint));
        }

        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);

        Ok(PreparedFile {
            file_name: source.file_name,
            file_path: source.file_path,
            size: source.size,
            upload_time: chrono::Utc::now().timestamp(),
            mime: source.mime,
            duration: source.duration,
            cattrs: source.cattrs,
            file_salt: hex::encode(salt),
            fingerprint,
        })
    }

    async fn commit(&self) -> BoxResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.dirty {
            return Ok(());
        }

        let plaintext = serde_json::to_vec(&inner.index)?;
        let sealed = seal(self.keys.index.as_bytes(), INDEX_AAD, &plaintext)
            .map_err(|e| anyhow::anyhow!("sealing local box index: {e}"))?;
        let file = LocalBoxFile {
            format: LOCAL_FORMAT.into(),
            version: LOCAL_VERSION,
            box_salt: hex::encode(self.box_salt),
            sealed: B64.encode(sealed),
        };
        let bytes = serde_json::to_vec(&file)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_private_atomic(&path, &bytes))
            .await
            .map_err(|e| anyhow::anyhow!("commit task failed: {e}"))??;

        inner.dirty = false;
        debug!(path = %self.path.display(), records = inner.index.records.len(), "local box committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> RemoteLocation {
        RemoteLocation {
            storage: StorageRoot::new("memory://"),
            prefix: "boxes/t".into(),
        }
    }

    fn basekey(b: u8) -> BaseKey {
        BaseKey::from_bytes([b; 32])
    }

    fn record(id: u64, path: &str, name: &str) -> FileRecord {
        FileRecord {
            id,
            file_name: name.into(),
            file_path: path.into(),
            size: 1,
            upload_time: 0,
            mime: None,
            duration: None,
            cattrs: Default::default(),
            file_salt: "00".into(),
            imported: false,
            fingerprint: Some(format!("fp{id}")),
        }
    }

    async fn make(dir: &Path, key: u8) -> FileLocalBox {
        FileLocalBox::make(
            &dir.join("box.tgbox"),
            "t",
            location(),
            [3u8; SALT_SIZE],
            derive_box_keys(&basekey(key)).unwrap(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_commit_and_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let local = make(tmp.path(), 1).await;
        local.import_file(record(1, "/a", "x")).await.unwrap();
        local.import_file(record(5, "/a/b", "y")).await.unwrap();
        local.commit().await.unwrap();

        let reopened = FileLocalBox::open(local.path(), &basekey(1)).await.unwrap();
        assert_eq!(reopened.files_total().await.unwrap(), 2);
        assert_eq!(reopened.last_file_id().await.unwrap(), Some(5));
        assert_eq!(reopened.remote_location().await, location());
    }

    #[tokio::test]
    async fn test_wrong_key_is_distinct() {
        let tmp = tempfile::tempdir().unwrap();
        let local = make(tmp.path(), 1).await;
        let err = FileLocalBox::open(local.path(), &basekey(2)).await.err();
        assert!(matches!(err, Some(BoxError::WrongKey(_))));
    }

    #[tokio::test]
    async fn test_make_refuses_existing_path() {
        let tmp = tempfile::tempdir().unwrap();
        make(tmp.path(), 1).await;
        let again = FileLocalBox::make(
            &tmp.path().join("box.tgbox"),
            "t",
            location(),
            [3u8; SALT_SIZE],
            derive_box_keys(&basekey(1)).unwrap(),
        )
        .await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_scope_prunes_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let local = make(tmp.path(), 1).await;
        local.import_file(record(1, "/home/u", "a")).await.unwrap();
        local.import_file(record(2, "/home/u/music", "b")).await.unwrap();
        local.import_file(record(3, "/srv", "c")).await.unwrap();

        let mut query = IdQuery::page(None, 10);
        query.scopes = vec!["/home/u".into()];
        assert_eq!(local.file_ids(&query).await.unwrap(), vec![1, 2]);

        query.non_recursive_scope = true;
        assert_eq!(local.file_ids(&query).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_prepare_detects_duplicate() {
        let tmp = tempfile::tempdir().unwrap();
        let local = make(tmp.path(), 1).await;
        let source = SourceFile {
            file_name: "a.txt".into(),
            file_path: "/docs".into(),
            size: 3,
            ..SourceFile::default()
        };
        let prepared = local.prepare_file(source.clone()).await.unwrap();
        assert_eq!(prepared.fingerprint, local.fingerprint("/docs/a.txt"));
        assert_eq!(prepared.file_salt.len(), 32);

        local.import_file(prepared.into_record(1)).await.unwrap();
        assert!(matches!(
            local.prepare_file(source).await,
            Err(BoxError::FingerprintExists(_))
        ));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let tmp = tempfile::tempdir().unwrap();
        let local = make(tmp.path(), 1).await;
        assert!(matches!(
            local.update_file(record(9, "/", "x")).await,
            Err(BoxError::LocalFileNotFound(9))
        ));
        assert!(!local.delete_file(9).await.unwrap());
    }
}
