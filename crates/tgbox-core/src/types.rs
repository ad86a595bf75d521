use serde::{Deserialize, Serialize};

use crate::cattrs::CAttrs;

/// Custom attribute keys used to link the parts of a split upload.
pub const MP_PART: &str = "__mp_part";
pub const MP_PREVIOUS: &str = "__mp_previous";
pub const MP_TOTAL: &str = "__mp_total";

/// A decrypted file record as stored in a Box.
///
/// `file_path` is the directory the file was uploaded from (always `/`
/// separated); `file_name` is the final component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: u64,
    pub file_name: String,
    pub file_path: String,
    pub size: u64,
    /// Upload time as Unix timestamp (seconds)
    pub upload_time: i64,
    #[serde(default)]
    pub mime: Option<String>,
    /// Media duration in seconds, if known
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub cattrs: CAttrs,
    /// Per-file salt (hex)
    pub file_salt: String,
    /// True if the key for this record came from a share, not our own upload
    #[serde(default)]
    pub imported: bool,
    /// Upload dedup fingerprint (hex)
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl FileRecord {
    /// `file_path` joined with `file_name`.
    pub fn full_path(&self) -> String {
        if self.file_path.is_empty() {
            self.file_name.clone()
        } else {
            format!("{}/{}", self.file_path.trim_end_matches('/'), self.file_name)
        }
    }

    /// Custom attribute decoded as UTF-8, if present and valid.
    pub fn cattr_str(&self, key: &str) -> Option<&str> {
        self.cattrs
            .get(key)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Multipart linkage, if this record is one part of a split upload.
    pub fn multipart(&self) -> Option<MultipartInfo> {
        let part = self.cattr_str(MP_PART)?.parse().ok()?;
        let total = self.cattr_str(MP_TOTAL)?.parse().ok()?;
        let previous = self.cattr_str(MP_PREVIOUS).and_then(|p| p.parse().ok());
        Some(MultipartInfo {
            part,
            total,
            previous,
        })
    }

    /// The original file name of a multipart part (`name.part3` → `name`).
    pub fn multipart_base_name(&self) -> Option<&str> {
        let info = self.multipart()?;
        self.file_name
            .strip_suffix(&format!(".part{}", info.part))
    }
}

/// The parts of a record that are readable without the Box key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub id: u64,
    pub size: u64,
    pub upload_time: i64,
    pub file_salt: String,
}

/// A record as returned by a Box backend: decrypted when the key allows it.
#[derive(Debug, Clone, PartialEq)]
pub enum BoxFile {
    Encrypted(EncryptedRecord),
    Decrypted(FileRecord),
}

impl BoxFile {
    pub fn id(&self) -> u64 {
        match self {
            BoxFile::Encrypted(r) => r.id,
            BoxFile::Decrypted(r) => r.id,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            BoxFile::Encrypted(r) => r.size,
            BoxFile::Decrypted(r) => r.size,
        }
    }

    pub fn upload_time(&self) -> i64 {
        match self {
            BoxFile::Encrypted(r) => r.upload_time,
            BoxFile::Decrypted(r) => r.upload_time,
        }
    }

    pub fn as_decrypted(&self) -> Option<&FileRecord> {
        match self {
            BoxFile::Encrypted(_) => None,
            BoxFile::Decrypted(r) => Some(r),
        }
    }

    pub fn into_decrypted(self) -> Option<FileRecord> {
        match self {
            BoxFile::Encrypted(_) => None,
            BoxFile::Decrypted(r) => Some(r),
        }
    }
}

/// Position of a record within a split upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartInfo {
    /// 1-based part index
    pub part: u32,
    pub total: u32,
    /// Id of the previous part (None for the first)
    pub previous: Option<u64>,
}

/// Result of probing an account session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}
