//! tgbox-sync: everything between the CLI and a Box
//!
//! - [`session`]: encrypted per-secret session state
//! - [`search`]: lazy filtered search cursor
//! - [`multipart`]: coalescing of split uploads for display
//! - [`engine`]: fast (activity log) and deep (id merge) box sync
//! - [`scheduler`]: concurrent-op and in-flight-byte transfer budgets
//! - [`transfer`]: upload and download batches
//! - [`batch`]: remove and custom attribute edits

pub mod batch;
pub mod engine;
pub mod multipart;
pub mod scheduler;
pub mod search;
pub mod session;
pub mod transfer;

pub use batch::{edit_attrs, remove_files, AttrEdit, AttrEditOptions, AttrEditReport, RemoveReport};
pub use engine::{ProgressFn, SyncEngine, SyncError, SyncMode, SyncOptions, SyncPhase, SyncReport};
pub use multipart::{Coalescer, MultipartGroup, SearchItem};
pub use scheduler::{TransferBudget, TransferScheduler};
pub use search::{SearchCursor, SearchOptions, DEFAULT_PAGE_SIZE};
pub use session::{BoxEntry, SessionError, SessionState, SessionStore, STATE_VERSION};
pub use transfer::{
    collect_files, download_records, download_target, guess_mime, upload_paths, CollectConfig,
    DownloadReport, TransferError, TransferProgress, UploadOptions, UploadReport,
};
