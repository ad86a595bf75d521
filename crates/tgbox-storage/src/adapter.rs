//! Box library boundary.
//!
//! Everything the CLI asks of a Box goes through these traits, so the
//! search, sync and transfer code never sees storage details. Records come
//! back as [`BoxFile`], tagged by whether the key could open them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use tgbox_core::{BoxFile, CAttrs, FileRecord};

use crate::error::BoxResult;

/// One page request over a box's record ids.
#[derive(Debug, Clone, Default)]
pub struct IdQuery {
    /// Exclusive cursor: ids strictly after this one in walk order
    pub after: Option<u64>,
    pub limit: usize,
    /// Walk descending instead of ascending
    pub reverse: bool,
    pub min_id: Option<u64>,
    pub max_id: Option<u64>,
    /// Directory prefixes; honored only when `supports_scope()`
    pub scopes: Vec<String>,
    pub non_recursive_scope: bool,
}

impl IdQuery {
    pub fn page(after: Option<u64>, limit: usize) -> Self {
        Self {
            after,
            limit,
            ..Self::default()
        }
    }

    /// Apply bounds, cursor, direction and limit to a sorted id list.
    pub fn select(&self, mut ids: Vec<u64>) -> Vec<u64> {
        ids.sort_unstable();
        ids.dedup();
        ids.retain(|id| {
            self.min_id.map_or(true, |min| *id >= min) && self.max_id.map_or(true, |max| *id <= max)
        });
        if self.reverse {
            ids.reverse();
            if let Some(after) = self.after {
                ids.retain(|id| *id < after);
            }
        } else if let Some(after) = self.after {
            ids.retain(|id| *id > after);
        }
        ids.truncate(self.limit);
        ids
    }
}

/// Read side shared by local and remote boxes.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// One page of record ids, ordered per `query.reverse`.
    async fn file_ids(&self, query: &IdQuery) -> BoxResult<Vec<u64>>;

    /// `Ok(None)` when no record has this id.
    async fn get_file(&self, id: u64) -> BoxResult<Option<BoxFile>>;

    async fn last_file_id(&self) -> BoxResult<Option<u64>>;

    async fn files_total(&self) -> BoxResult<u64>;

    /// Whether `IdQuery::scopes` prunes the walk. Remote boxes have no
    /// path index and ignore scopes.
    fn supports_scope(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogAction {
    Add,
    Edit,
    Delete,
}

/// One activity log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub action: LogAction,
    pub file_id: u64,
    /// Unix seconds
    pub time: i64,
}

/// Result of reading the remote activity log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityLog {
    /// Entries inside the retention window, oldest first
    Entries(Vec<LogEntry>),
    /// The connecting identity may not read the log
    Denied,
}

/// Called with the number of bytes moved so far.
pub type BlockProgress = dyn Fn(u64) + Send + Sync;

/// What the caller knows about a file before upload.
#[derive(Debug, Clone, Default)]
pub struct SourceFile {
    pub file_name: String,
    /// Directory inside the box, `/` separated
    pub file_path: String,
    pub size: u64,
    pub mime: Option<String>,
    pub duration: Option<f64>,
    pub cattrs: CAttrs,
}

impl SourceFile {
    /// `file_path/file_name`, the string the fingerprint is computed over.
    pub fn box_path(&self) -> String {
        if self.file_path.is_empty() {
            self.file_name.clone()
        } else {
            format!("{}/{}", self.file_path.trim_end_matches('/'), self.file_name)
        }
    }
}

/// A file ready for `push_file`: salted, fingerprinted, timestamped.
#[derive(Debug, Clone)]
pub struct PreparedFile {
    pub file_name: String,
    pub file_path: String,
    pub size: u64,
    pub upload_time: i64,
    pub mime: Option<String>,
    pub duration: Option<f64>,
    pub cattrs: CAttrs,
    pub file_salt: String,
    pub fingerprint: String,
}

impl PreparedFile {
    pub fn into_record(self, id: u64) -> FileRecord {
        FileRecord {
            id,
            file_name: self.file_name,
            file_path: self.file_path,
            size: self.size,
            upload_time: self.upload_time,
            mime: self.mime,
            duration: self.duration,
            cattrs: self.cattrs,
            file_salt: self.file_salt,
            imported: false,
            fingerprint: Some(self.fingerprint),
        }
    }
}

/// The remote store of record.
#[async_trait]
pub trait RemoteBox: RecordSource {
    async fn activity_log(&self) -> BoxResult<ActivityLog>;

    /// Upload content and publish the record. Returns it with its new id.
    async fn push_file(
        &self,
        file: PreparedFile,
        content: &mut (dyn AsyncRead + Send + Unpin),
        progress: Option<&BlockProgress>,
    ) -> BoxResult<FileRecord>;

    /// Replace the sealed metadata of an existing record.
    async fn update_metadata(&self, record: &FileRecord) -> BoxResult<()>;

    /// Returns how many of `ids` existed and were removed.
    async fn delete_files(&self, ids: &[u64]) -> BoxResult<usize>;

    /// Decrypted content block `block` of file `id`.
    async fn read_block(&self, id: u64, block: u64) -> BoxResult<Vec<u8>>;

    async fn block_count(&self, id: u64) -> BoxResult<u64>;

    /// Plaintext bytes per content block.
    fn block_size(&self) -> u64;
}

/// The local encrypted index of a box.
#[async_trait]
pub trait LocalBox: RecordSource {
    /// Insert or overwrite a record taken from the remote box.
    async fn import_file(&self, record: FileRecord) -> BoxResult<()>;

    /// Overwrite an existing record; `LocalFileNotFound` when absent.
    async fn update_file(&self, record: FileRecord) -> BoxResult<()>;

    /// Returns whether a record was removed.
    async fn delete_file(&self, id: u64) -> BoxResult<bool>;

    async fn find_fingerprint(&self, fingerprint: &str) -> BoxResult<Option<FileRecord>>;

    async fn find_by_path(&self, file_path: &str, file_name: &str)
        -> BoxResult<Option<FileRecord>>;

    /// Salt, fingerprint and timestamp a file for upload.
    /// `FingerprintExists` when the box already holds it.
    async fn prepare_file(&self, source: SourceFile) -> BoxResult<PreparedFile>;

    /// Persist pending changes.
    async fn commit(&self) -> BoxResult<()>;
}
