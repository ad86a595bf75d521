use thiserror::Error;

pub type TgboxResult<T> = Result<T, TgboxError>;

#[derive(Debug, Error)]
pub enum TgboxError {
    #[error("config error: {0}")]
    Config(String),

    #[error("custom attributes: {0}")]
    CAttrs(String),

    #[error("not initialized: {0}")]
    NotInitialized(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
