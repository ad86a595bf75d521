//! Box sync engine: bring the local index in line with the remote box.
//!
//! Two modes:
//!   - Fast: replay the remote activity log (a bounded window). Only ids the
//!     log names are touched; for each id the last logged action wins.
//!   - Deep: walk the local and remote id lists in ascending pages and merge
//!     them. Local-only ids are deleted, remote-only ids are fetched and
//!     imported.
//!
//! The local box is committed periodically during a deep walk and always
//! before `run` returns, success or not.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use tgbox_core::BoxFile;
use tgbox_storage::{
    ActivityLog, BoxError, IdQuery, LocalBox, LogAction, RecordSource, RemoteBox,
};

/// Progress callback type (current, total)
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Fast,
    Deep,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Fast => f.write_str("fast"),
            SyncMode::Deep => f.write_str("deep"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Running(SyncMode),
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub deep: bool,
    /// Deep only: ignore ids at or below this one
    pub start_from: Option<u64>,
    pub page_size: usize,
    /// Sleep `timeout` after this many files (0 disables)
    pub throttle_every: usize,
    pub timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            deep: false,
            start_from: None,
            page_size: 100,
            throttle_every: 100,
            timeout: Duration::from_secs(15),
        }
    }
}

impl SyncOptions {
    pub fn mode(&self) -> SyncMode {
        if self.deep {
            SyncMode::Deep
        } else {
            SyncMode::Fast
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("--start-from-id only applies to deep sync (add --deep)")]
    StartFromRequiresDeep,

    #[error("remote file {0} is referenced but cannot be fetched")]
    RemoteFileNotFound(u64),

    #[error(transparent)]
    Box(#[from] BoxError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub imported: u64,
    pub updated: u64,
    pub deleted: u64,
    /// Remote records the box key cannot open
    pub undecryptable: u64,
    /// The activity log was not readable; nothing was changed
    pub log_denied: bool,
    /// Ids examined
    pub scanned: u64,
}

pub struct SyncEngine<'a, L: ?Sized, R: ?Sized> {
    local: &'a L,
    remote: &'a R,
    options: SyncOptions,
    phase: SyncPhase,
    progress: Option<ProgressFn>,
}

impl<'a, L, R> SyncEngine<'a, L, R>
where
    L: LocalBox + ?Sized,
    R: RemoteBox + ?Sized,
{
    pub fn new(local: &'a L, remote: &'a R, options: SyncOptions) -> Self {
        Self {
            local,
            remote,
            options,
            phase: SyncPhase::Idle,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub async fn run(&mut self) -> Result<SyncReport, SyncError> {
        let mode = self.options.mode();
        if mode == SyncMode::Fast && self.options.start_from.is_some() {
            return Err(SyncError::StartFromRequiresDeep);
        }

        self.phase = SyncPhase::Running(mode);
        info!(%mode, start_from = ?self.options.start_from, "sync started");

        let mut report = SyncReport::default();
        let result = match mode {
            SyncMode::Fast => self.run_fast(&mut report).await,
            SyncMode::Deep => self.run_deep(&mut report).await,
        };
        let committed = self.local.commit().await;

        match (result, committed) {
            (Ok(()), Ok(())) => {
                self.phase = SyncPhase::Completed;
                info!(
                    %mode,
                    imported = report.imported,
                    updated = report.updated,
                    deleted = report.deleted,
                    undecryptable = report.undecryptable,
                    scanned = report.scanned,
                    "sync completed"
                );
                Ok(report)
            }
            (Ok(()), Err(e)) => {
                self.phase = SyncPhase::Failed;
                Err(e.into())
            }
            (Err(e), committed) => {
                self.phase = SyncPhase::Failed;
                if let Err(ce) = committed {
                    warn!("commit after failed sync also failed: {ce}");
                }
                Err(e)
            }
        }
    }

    fn report_progress(&self, current: u64, total: u64) {
        if let Some(progress) = &self.progress {
            progress(current, total);
        }
    }

    async fn run_fast(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let entries = match self.remote.activity_log().await? {
            ActivityLog::Entries(entries) => entries,
            ActivityLog::Denied => {
                warn!("activity log is not readable, nothing synced");
                report.log_denied = true;
                return Ok(());
            }
        };

        // entries are oldest first, so later inserts win
        let mut last_action: BTreeMap<u64, LogAction> = BTreeMap::new();
        for entry in entries {
            last_action.insert(entry.file_id, entry.action);
        }
        let total = last_action.len() as u64;
        debug!(entries = total, "activity log collapsed");

        for (n, (id, action)) in last_action.into_iter().enumerate() {
            report.scanned += 1;
            match action {
                LogAction::Delete => {
                    if self.local.delete_file(id).await? {
                        debug!(id, "deleted locally");
                        report.deleted += 1;
                    }
                }
                LogAction::Add | LogAction::Edit => self.pull(id, report).await?,
            }
            self.report_progress(n as u64 + 1, total);
        }
        Ok(())
    }

    /// Fetch one remote record and import or refresh it locally.
    async fn pull(&self, id: u64, report: &mut SyncReport) -> Result<(), SyncError> {
        let record = match self.remote.get_file(id).await? {
            None => return Err(SyncError::RemoteFileNotFound(id)),
            Some(BoxFile::Encrypted(_)) => {
                warn!(id, "remote record does not decrypt with this box key, skipping");
                report.undecryptable += 1;
                return Ok(());
            }
            Some(BoxFile::Decrypted(record)) => record,
        };

        if self.local.get_file(id).await?.is_some() {
            self.local.update_file(record).await?;
            debug!(id, "updated locally");
            report.updated += 1;
        } else {
            self.local.import_file(record).await?;
            debug!(id, "imported");
            report.imported += 1;
        }
        Ok(())
    }

    async fn run_deep(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let start_from = self.options.start_from.unwrap_or(0);
        let page_size = self.options.page_size.max(1);
        let mut local_ids = PagedIds::new(self.local, start_from, page_size);
        let mut remote_ids = PagedIds::new(self.remote, start_from, page_size);

        let mut total = self
            .remote
            .files_total()
            .await?
            .max(self.local.files_total().await?);
        // ids imported during this walk show up again in later local pages
        let mut imported: HashSet<u64> = HashSet::new();

        loop {
            let local_next = local_ids.peek().await?;
            if local_next.is_some_and(|id| imported.contains(&id)) {
                local_ids.advance();
                continue;
            }
            let remote_next = remote_ids.peek().await?;

            match (local_next, remote_next) {
                (None, None) => break,
                (Some(l), r) if r.map_or(true, |r| l < r) => {
                    local_ids.advance();
                    if self.local.delete_file(l).await? {
                        debug!(id = l, "not in remote box, deleted locally");
                        report.deleted += 1;
                    }
                }
                (l, Some(r)) if l.map_or(true, |l| r < l) => {
                    remote_ids.advance();
                    let before = report.imported + report.updated;
                    self.pull(r, report).await?;
                    if report.imported + report.updated > before {
                        imported.insert(r);
                    }
                }
                _ => {
                    // present on both sides
                    local_ids.advance();
                    remote_ids.advance();
                }
            }

            report.scanned += 1;
            total = total.max(report.scanned);
            self.report_progress(report.scanned, total);
            self.throttle(report.scanned).await?;
        }
        Ok(())
    }

    async fn throttle(&self, scanned: u64) -> Result<(), SyncError> {
        let every = self.options.throttle_every as u64;
        if every == 0 || scanned % every != 0 {
            return Ok(());
        }
        self.local.commit().await?;
        if !self.options.timeout.is_zero() {
            debug!(
                scanned,
                secs = self.options.timeout.as_secs_f64(),
                "throttling deep sync"
            );
            tokio::time::sleep(self.options.timeout).await;
        }
        Ok(())
    }
}

/// Ascending id stream over a record source, fetched a page at a time.
struct PagedIds<'a, S: ?Sized> {
    source: &'a S,
    query: IdQuery,
    buf: VecDeque<u64>,
    done: bool,
}

impl<'a, S: RecordSource + ?Sized> PagedIds<'a, S> {
    fn new(source: &'a S, start_from: u64, page_size: usize) -> Self {
        Self {
            source,
            query: IdQuery::page(Some(start_from), page_size),
            buf: VecDeque::new(),
            done: false,
        }
    }

    async fn peek(&mut self) -> Result<Option<u64>, BoxError> {
        if self.buf.is_empty() && !self.done {
            let ids = self.source.file_ids(&self.query).await?;
            if ids.len() < self.query.limit {
                self.done = true;
            }
            if let Some(last) = ids.last() {
                self.query.after = Some(*last);
            }
            self.buf.extend(ids);
        }
        Ok(self.buf.front().copied())
    }

    fn advance(&mut self) {
        self.buf.pop_front();
    }
}
