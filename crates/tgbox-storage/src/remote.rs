//! Remote box on an OpenDAL operator.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use opendal::Operator;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tgbox_core::{BoxFile, FileRecord};
use tgbox_crypto::{decrypt_block, encrypt_block, BoxKeys, SALT_SIZE};

use crate::adapter::{
    ActivityLog, BlockProgress, IdQuery, LogAction, LogEntry, PreparedFile, RecordSource,
    RemoteBox,
};
use crate::envelope::{
    block_path, files_dir, header_path, log_dir, log_path, parse_record_name, record_path,
    BoxHeader, RecordEnvelope,
};
use crate::error::{BoxError, BoxResult};

/// Default plaintext block size (512 KiB)
pub const DEFAULT_BLOCK_SIZE: u64 = 512 * 1024;

/// Default activity log retention (48 hours)
pub const DEFAULT_LOG_WINDOW_SECS: i64 = 48 * 3600;

/// Options for `OpendalRemoteBox::make`.
#[derive(Debug, Clone)]
pub struct MakeOptions {
    pub block_size: u64,
    pub log_readable: bool,
}

impl Default for MakeOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            log_readable: true,
        }
    }
}

pub struct OpendalRemoteBox {
    op: Operator,
    prefix: String,
    keys: BoxKeys,
    /// Guards `next_id` allocation
    header: Mutex<BoxHeader>,
    block_size: u64,
    log_readable: bool,
    log_window_secs: i64,
    /// Random per handle, keeps log names of concurrent writers apart
    log_writer: u64,
    /// Orders this handle's log entries written within one millisecond
    log_seq: AtomicU64,
}

impl OpendalRemoteBox {
    /// Create a new box under `prefix`. Fails when one already exists there.
    pub async fn make(
        op: Operator,
        prefix: &str,
        name: &str,
        salt: &[u8; SALT_SIZE],
        keys: BoxKeys,
        options: MakeOptions,
    ) -> BoxResult<Self> {
        let prefix = normalize_prefix(prefix);
        if op.exists(&header_path(&prefix)).await? {
            return Err(BoxError::Other(anyhow::anyhow!(
                "a box already exists at `{prefix}`"
            )));
        }
        let header = BoxHeader::new(name, salt, &keys, options.block_size, options.log_readable)?;
        op.write(&header_path(&prefix), serde_json::to_vec_pretty(&header)?)
            .await?;
        info!(prefix = %prefix, name, "remote box created");
        Ok(Self::from_parts(op, prefix, keys, header))
    }

    /// Open an existing box; `WrongKey` when `keys` do not belong to it.
    pub async fn open(op: Operator, prefix: &str, keys: BoxKeys) -> BoxResult<Self> {
        let prefix = normalize_prefix(prefix);
        let header = Self::read_header(&op, &prefix).await?;
        header.verify(&keys)?;
        debug!(prefix = %prefix, name = %header.name, "remote box opened");
        Ok(Self::from_parts(op, prefix, keys, header))
    }

    /// Header of the box at `prefix`, readable without any key.
    pub async fn read_header(op: &Operator, prefix: &str) -> BoxResult<BoxHeader> {
        let path = header_path(&normalize_prefix(prefix));
        match op.read(&path).await {
            Ok(buf) => BoxHeader::from_bytes(&buf.to_vec()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                Err(BoxError::NotABox(format!("no box header at `{path}`")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn from_parts(op: Operator, prefix: String, keys: BoxKeys, header: BoxHeader) -> Self {
        Self {
            op,
            prefix,
            keys,
            block_size: header.block_size.max(1),
            log_readable: header.log_readable,
            header: Mutex::new(header),
            log_window_secs: DEFAULT_LOG_WINDOW_SECS,
            log_writer: rand::random(),
            log_seq: AtomicU64::new(0),
        }
    }

    pub fn with_log_window(mut self, secs: i64) -> Self {
        self.log_window_secs = secs;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub async fn name(&self) -> String {
        self.header.lock().await.name.clone()
    }

    /// Append one entry to the activity log.
    pub async fn record_activity(&self, entry: &LogEntry) -> BoxResult<()> {
        let seq = self.log_seq.fetch_add(1, Ordering::Relaxed);
        let path = log_path(
            &self.prefix,
            chrono::Utc::now().timestamp_millis(),
            self.log_writer,
            seq,
            entry.file_id,
        );
        self.op.write(&path, serde_json::to_vec(entry)?).await?;
        Ok(())
    }

    async fn log(&self, action: LogAction, file_id: u64) -> BoxResult<()> {
        self.record_activity(&LogEntry {
            action,
            file_id,
            time: chrono::Utc::now().timestamp(),
        })
        .await
    }

    async fn allocate_id(&self) -> BoxResult<u64> {
        let mut header = self.header.lock().await;
        let id = header.next_id;
        header.next_id += 1;
        self.op
            .write(&header_path(&self.prefix), serde_json::to_vec_pretty(&*header)?)
            .await?;
        Ok(id)
    }

    async fn list_ids(&self) -> BoxResult<Vec<u64>> {
        let entries = match self.op.list(&files_dir(&self.prefix)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids: Vec<u64> = entries
            .iter()
            .filter_map(|entry| parse_record_name(entry.name()))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn read_envelope(&self, id: u64) -> BoxResult<Option<RecordEnvelope>> {
        match self.op.read(&record_path(&self.prefix, id)).await {
            Ok(buf) => Ok(Some(serde_json::from_slice(&buf.to_vec())?)),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn blocks_for(&self, size: u64) -> u64 {
        size.div_ceil(self.block_size)
    }
}

#[async_trait]
impl RecordSource for OpendalRemoteBox {
    async fn file_ids(&self, query: &IdQuery) -> BoxResult<Vec<u64>> {
        Ok(query.select(self.list_ids().await?))
    }

    async fn get_file(&self, id: u64) -> BoxResult<Option<BoxFile>> {
        Ok(self
            .read_envelope(id)
            .await?
            .map(|envelope| envelope.open(&self.keys)))
    }

    async fn last_file_id(&self) -> BoxResult<Option<u64>> {
        Ok(self.list_ids().await?.last().copied())
    }

    async fn files_total(&self) -> BoxResult<u64> {
        Ok(self.list_ids().await?.len() as u64)
    }

    fn supports_scope(&self) -> bool {
        false
    }
}

#[async_trait]
impl RemoteBox for OpendalRemoteBox {
    async fn activity_log(&self) -> BoxResult<ActivityLog> {
        if !self.log_readable {
            return Ok(ActivityLog::Denied);
        }
        let entries = match self.op.list(&log_dir(&self.prefix)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let cutoff = chrono::Utc::now().timestamp() - self.log_window_secs;
        let mut names: Vec<String> = entries
            .iter()
            .filter(|e| e.name().ends_with(".json"))
            .map(|e| e.path().to_string())
            .collect();
        names.sort();

        let mut log = Vec::with_capacity(names.len());
        for path in names {
            let buf = self.op.read(&path).await?;
            match serde_json::from_slice::<LogEntry>(&buf.to_vec()) {
                Ok(entry) if entry.time >= cutoff => log.push(entry),
                Ok(_) => {}
                Err(e) => warn!(path = %path, error = %e, "skipping unreadable log entry"),
            }
        }
        Ok(ActivityLog::Entries(log))
    }

    async fn push_file(
        &self,
        file: PreparedFile,
        content: &mut (dyn AsyncRead + Send + Unpin),
        progress: Option<&BlockProgress>,
    ) -> BoxResult<FileRecord> {
        let id = self.allocate_id().await?;
        let expected = file.size;

        let mut buf = vec![0u8; self.block_size as usize];
        let mut block = 0u64;
        let mut written = 0u64;
        loop {
            let n = read_full(content, &mut buf).await?;
            if n == 0 {
                break;
            }
            let sealed = encrypt_block(&self.keys.content, id, block, &buf[..n])?;
            self.op
                .write(&block_path(&self.prefix, id, block), sealed)
                .await?;
            written += n as u64;
            block += 1;
            if let Some(progress) = progress {
                progress(written);
            }
            if n < buf.len() {
                break;
            }
        }

        if written != expected {
            warn!(id, expected, written, "file size changed during upload");
        }
        let mut record = file.into_record(id);
        record.size = written;

        let envelope = RecordEnvelope::seal(&self.keys, &record)?;
        self.op
            .write(
                &record_path(&self.prefix, id),
                serde_json::to_vec(&envelope)?,
            )
            .await?;
        self.log(LogAction::Add, id).await?;

        debug!(id, bytes = written, blocks = block, "pushed file");
        Ok(record)
    }

    async fn update_metadata(&self, record: &FileRecord) -> BoxResult<()> {
        let current = self
            .read_envelope(record.id)
            .await?
            .ok_or(BoxError::RemoteFileNotFound(record.id))?;

        // size, time and salt are fixed at upload
        let mut record = record.clone();
        record.size = current.size;
        record.upload_time = current.upload_time;
        record.file_salt = current.file_salt;

        let envelope = RecordEnvelope::seal(&self.keys, &record)?;
        self.op
            .write(
                &record_path(&self.prefix, record.id),
                serde_json::to_vec(&envelope)?,
            )
            .await?;
        self.log(LogAction::Edit, record.id).await
    }

    async fn delete_files(&self, ids: &[u64]) -> BoxResult<usize> {
        let mut deleted = 0;
        for &id in ids {
            let Some(envelope) = self.read_envelope(id).await? else {
                debug!(id, "delete: record already gone");
                continue;
            };
            for block in 0..self.blocks_for(envelope.size) {
                self.op.delete(&block_path(&self.prefix, id, block)).await?;
            }
            self.op
                .delete(&record_path(&self.prefix, id))
                .await?;
            self.log(LogAction::Delete, id).await?;
            deleted += 1;
        }
        info!(requested = ids.len(), deleted, "deleted remote files");
        Ok(deleted)
    }

    async fn read_block(&self, id: u64, block: u64) -> BoxResult<Vec<u8>> {
        let sealed = match self.op.read(&block_path(&self.prefix, id, block)).await {
            Ok(buf) => buf.to_vec(),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                return Err(BoxError::RemoteFileNotFound(id))
            }
            Err(e) => return Err(e.into()),
        };
        decrypt_block(&self.keys.content, id, block, &sealed)
            .map_err(|e| BoxError::WrongKey(e.to_string()))
    }

    async fn block_count(&self, id: u64) -> BoxResult<u64> {
        let envelope = self
            .read_envelope(id)
            .await?
            .ok_or(BoxError::RemoteFileNotFound(id))?;
        Ok(self.blocks_for(envelope.size))
    }

    fn block_size(&self) -> u64 {
        self.block_size
    }
}

/// Read until `buf` is full or the source is exhausted.
async fn read_full(
    src: &mut (dyn AsyncRead + Send + Unpin),
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = src.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgbox_crypto::{derive_box_keys, BaseKey};

    fn keys(b: u8) -> BoxKeys {
        derive_box_keys(&BaseKey::from_bytes([b; 32])).unwrap()
    }

    fn memory_operator() -> Operator {
        Operator::new(opendal::services::Memory::default())
            .expect("memory operator")
            .finish()
    }

    fn prepared(name: &str, size: u64) -> PreparedFile {
        PreparedFile {
            file_name: name.into(),
            file_path: "/docs".into(),
            size,
            upload_time: chrono::Utc::now().timestamp(),
            mime: None,
            duration: None,
            cattrs: Default::default(),
            file_salt: "00".into(),
            fingerprint: format!("fp-{name}"),
        }
    }

    async fn small_box(op: Operator) -> OpendalRemoteBox {
        OpendalRemoteBox::make(
            op,
            "boxes/test",
            "test",
            &[1u8; SALT_SIZE],
            keys(1),
            MakeOptions {
                block_size: 4,
                log_readable: true,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_push_and_read_blocks() {
        let remote = small_box(memory_operator()).await;
        let data = b"0123456789".to_vec();
        let record = remote
            .push_file(prepared("a", 10), &mut data.as_slice(), None)
            .await
            .unwrap();

        assert_eq!(record.id, 1);
        assert_eq!(remote.block_count(1).await.unwrap(), 3);
        let mut out = Vec::new();
        for b in 0..3 {
            out.extend(remote.read_block(1, b).await.unwrap());
        }
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_ids_are_never_reused() {
        let remote = small_box(memory_operator()).await;
        let a = remote.push_file(prepared("a", 1), &mut &b"a"[..], None).await.unwrap();
        assert_eq!(remote.delete_files(&[a.id]).await.unwrap(), 1);
        assert_eq!(remote.delete_files(&[a.id]).await.unwrap(), 0);
        let b = remote.push_file(prepared("b", 1), &mut &b"b"[..], None).await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(remote.files_total().await.unwrap(), 1);
        assert_eq!(remote.last_file_id().await.unwrap(), Some(b.id));
    }

    #[tokio::test]
    async fn test_open_with_wrong_key() {
        let op = memory_operator();
        small_box(op.clone()).await;
        let err = OpendalRemoteBox::open(op, "boxes/test", keys(2)).await.err();
        assert!(matches!(err, Some(BoxError::WrongKey(_))));
    }

    #[tokio::test]
    async fn test_open_missing_box() {
        let err = OpendalRemoteBox::open(memory_operator(), "nowhere", keys(1))
            .await
            .err();
        assert!(matches!(err, Some(BoxError::NotABox(_))));
    }

    #[tokio::test]
    async fn test_activity_log_records_actions() {
        let remote = small_box(memory_operator()).await;
        let rec = remote.push_file(prepared("a", 1), &mut &b"a"[..], None).await.unwrap();
        remote.update_metadata(&rec).await.unwrap();
        remote.delete_files(&[rec.id]).await.unwrap();

        let ActivityLog::Entries(entries) = remote.activity_log().await.unwrap() else {
            panic!("log should be readable");
        };
        let actions: Vec<LogAction> = entries.iter().map(|e| e.action).collect();
        assert!(actions.contains(&LogAction::Add));
        assert!(actions.contains(&LogAction::Edit));
        assert!(actions.contains(&LogAction::Delete));
    }

    #[tokio::test]
    async fn test_activity_log_window() {
        let remote = small_box(memory_operator()).await.with_log_window(3600);
        let old = chrono::Utc::now().timestamp() - 7200;
        remote
            .record_activity(&LogEntry {
                action: LogAction::Add,
                file_id: 99,
                time: old,
            })
            .await
            .unwrap();
        assert_eq!(
            remote.activity_log().await.unwrap(),
            ActivityLog::Entries(vec![])
        );
    }

    #[tokio::test]
    async fn test_activity_log_keeps_entries_of_concurrent_writers() {
        let op = memory_operator();
        let first = small_box(op.clone()).await;
        let second = OpendalRemoteBox::open(op, "boxes/test", keys(1)).await.unwrap();
        let entry = LogEntry {
            action: LogAction::Edit,
            file_id: 7,
            time: chrono::Utc::now().timestamp(),
        };
        for _ in 0..3 {
            first.record_activity(&entry).await.unwrap();
            second.record_activity(&entry).await.unwrap();
        }

        let ActivityLog::Entries(entries) = first.activity_log().await.unwrap() else {
            panic!("log should be readable");
        };
        assert_eq!(entries.len(), 6);
    }

    #[tokio::test]
    async fn test_activity_log_denied() {
        let remote = OpendalRemoteBox::make(
            memory_operator(),
            "b",
            "b",
            &[0u8; SALT_SIZE],
            keys(1),
            MakeOptions {
                log_readable: false,
                ..MakeOptions::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(remote.activity_log().await.unwrap(), ActivityLog::Denied);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let remote = small_box(memory_operator()).await;
        let rec = prepared("a", 1).into_record(42);
        assert!(matches!(
            remote.update_metadata(&rec).await,
            Err(BoxError::RemoteFileNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_empty_file_has_no_blocks() {
        let remote = small_box(memory_operator()).await;
        let rec = remote.push_file(prepared("e", 0), &mut &b""[..], None).await.unwrap();
        assert_eq!(rec.size, 0);
        assert_eq!(remote.block_count(rec.id).await.unwrap(), 0);
    }
}
