//! tgbox-storage: the Box library boundary and its reference backend
//!
//! - [`adapter`]: traits the CLI drives (`RecordSource`, `RemoteBox`, `LocalBox`)
//! - [`remote`]: remote box on an OpenDAL operator (fs, S3, memory)
//! - [`local`]: local box as one encrypted index file
//! - [`account`]: account session blobs and connection status

pub mod account;
pub mod adapter;
pub mod envelope;
pub mod error;
pub mod health;
pub mod local;
pub mod operator;
pub mod remote;

pub use account::AccountSession;
pub use adapter::{
    ActivityLog, BlockProgress, IdQuery, LocalBox, LogAction, LogEntry, PreparedFile,
    RecordSource, RemoteBox, SourceFile,
};
pub use error::{BoxError, BoxResult};
pub use health::{check_health, check_connection};
pub use local::{FileLocalBox, LocalIndex, RemoteLocation};
pub use operator::{build_operator, StorageRoot};
pub use remote::{MakeOptions, OpendalRemoteBox, DEFAULT_BLOCK_SIZE, DEFAULT_LOG_WINDOW_SECS};
