pub mod cattrs;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod types;

pub use cattrs::{pack_cattrs, parse_cattrs_arg, parse_cattrs_shorthand, unpack_cattrs, CAttrs};
pub use error::{TgboxError, TgboxResult};
pub use fsutil::write_private_atomic;
pub use types::{BoxFile, ConnectionStatus, EncryptedRecord, FileRecord, MultipartInfo};
