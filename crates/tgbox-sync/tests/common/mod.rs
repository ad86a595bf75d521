//! Shared box fixtures: one in-memory remote box, any number of clients.

#![allow(dead_code)]

use opendal::Operator;
use tempfile::TempDir;

use tgbox_core::{CAttrs, FileRecord};
use tgbox_crypto::{derive_box_keys, BaseKey, SALT_SIZE};
use tgbox_storage::envelope::{record_path, RecordEnvelope};
use tgbox_storage::{
    build_operator, FileLocalBox, LocalBox, MakeOptions, OpendalRemoteBox, RemoteBox,
    RemoteLocation, SourceFile, StorageRoot,
};

pub const SALT: [u8; SALT_SIZE] = [9u8; SALT_SIZE];
pub const BLOCK_SIZE: u64 = 16;

pub struct Client {
    pub remote: OpendalRemoteBox,
    pub local: FileLocalBox,
}

pub struct Fixture {
    pub tmp: TempDir,
    pub op: Operator,
    pub basekey: BaseKey,
    clients: usize,
}

impl Fixture {
    pub async fn new(log_readable: bool) -> Self {
        let op = build_operator(&StorageRoot::new("memory://")).unwrap();
        let basekey = BaseKey::from_bytes([5u8; 32]);
        OpendalRemoteBox::make(
            op.clone(),
            "box",
            "box",
            &SALT,
            derive_box_keys(&basekey).unwrap(),
            MakeOptions {
                block_size: BLOCK_SIZE,
                log_readable,
            },
        )
        .await
        .unwrap();
        Self {
            tmp: TempDir::new().unwrap(),
            op,
            basekey,
            clients: 0,
        }
    }

    /// A fresh client: its own empty local box over the shared remote.
    pub async fn client(&mut self) -> Client {
        self.clients += 1;
        let remote = OpendalRemoteBox::open(
            self.op.clone(),
            "box",
            derive_box_keys(&self.basekey).unwrap(),
        )
        .await
        .unwrap();
        let local = FileLocalBox::make(
            &self.tmp.path().join(format!("client{}.tgbox", self.clients)),
            "box",
            RemoteLocation {
                storage: StorageRoot::new("memory://"),
                prefix: "box".into(),
            },
            SALT,
            derive_box_keys(&self.basekey).unwrap(),
        )
        .await
        .unwrap();
        Client { remote, local }
    }
}

pub fn source(path: &str, name: &str, size: u64) -> SourceFile {
    SourceFile {
        file_name: name.into(),
        file_path: path.into(),
        size,
        mime: None,
        duration: None,
        cattrs: CAttrs::new(),
    }
}

/// Upload `content` as `path/name` from this client and index it locally.
pub async fn push(client: &Client, mut src: SourceFile, content: &[u8]) -> FileRecord {
    src.size = content.len() as u64;
    let prepared = client.local.prepare_file(src).await.unwrap();
    let mut reader = content;
    let record = client
        .remote
        .push_file(prepared, &mut reader, None)
        .await
        .unwrap();
    client.local.import_file(record.clone()).await.unwrap();
    record
}

/// A local-only record the remote box never had.
pub fn stray(id: u64) -> FileRecord {
    FileRecord {
        id,
        file_name: format!("stray{id}"),
        file_path: "/stray".into(),
        size: 1,
        upload_time: 1_700_000_000,
        mime: None,
        duration: None,
        cattrs: CAttrs::new(),
        file_salt: "00".into(),
        imported: false,
        fingerprint: None,
    }
}

impl Fixture {
    /// Remove a record's envelope without logging it, as a half-finished
    /// delete by another client would leave it.
    pub async fn drop_record(&self, id: u64) {
        self.op.delete(&record_path("box", id)).await.unwrap();
    }

    /// Write a record sealed under a key this box does not use.
    pub async fn plant_foreign(&self, record: &FileRecord) {
        let foreign = derive_box_keys(&BaseKey::from_bytes([6u8; 32])).unwrap();
        let envelope = RecordEnvelope::seal(&foreign, record).unwrap();
        self.op
            .write(
                &record_path("box", record.id),
                serde_json::to_vec(&envelope).unwrap(),
            )
            .await
            .unwrap();
    }
}
