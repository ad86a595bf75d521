use thiserror::Error;

pub type BoxResult<T> = Result<T, BoxError>;

#[derive(Debug, Error)]
pub enum BoxError {
    /// A record the caller referenced is gone from the remote store
    #[error("remote file {0} not found")]
    RemoteFileNotFound(u64),

    #[error("local file {0} not found")]
    LocalFileNotFound(u64),

    /// Phrase or base key does not open the box
    #[error("wrong box key: {0}")]
    WrongKey(String),

    #[error("not a tgbox box: {0}")]
    NotABox(String),

    #[error("box format version {found} is newer than supported ({supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("file already uploaded (fingerprint {0})")]
    FingerprintExists(String),

    #[error("storage error: {0}")]
    Storage(#[from] opendal::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BoxError {
    /// True for opendal `NotFound`, which callers usually map to `None`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BoxError::Storage(e) if e.kind() == opendal::ErrorKind::NotFound)
    }
}
