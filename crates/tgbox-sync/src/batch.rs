//! Filter-driven batch edits: remove and custom attribute changes.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use tgbox_core::types::{MP_PART, MP_PREVIOUS, MP_TOTAL};
use tgbox_core::{CAttrs, FileRecord};
use tgbox_storage::{BoxError, LocalBox, RemoteBox};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveReport {
    pub remote_deleted: usize,
    pub local_deleted: usize,
}

/// Delete `ids` from the local box and, when `remote` is given, from the
/// remote box first.
pub async fn remove_files<L, R>(local: &L, remote: Option<&R>, ids: &[u64]) -> Result<RemoveReport>
where
    L: LocalBox + ?Sized,
    R: RemoteBox + ?Sized,
{
    let mut report = RemoveReport::default();
    if ids.is_empty() {
        return Ok(report);
    }

    if let Some(remote) = remote {
        report.remote_deleted = remote
            .delete_files(ids)
            .await
            .context("deleting from remote box")?;
    }
    for id in ids {
        if local.delete_file(*id).await? {
            report.local_deleted += 1;
        }
    }
    local.commit().await?;

    info!(
        remote = report.remote_deleted,
        local = report.local_deleted,
        "files removed"
    );
    Ok(report)
}

/// How new attributes combine with a record's current ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrEdit {
    /// Set these keys, keep the rest
    Merge(CAttrs),
    /// Drop every user key, then set these
    Replace(CAttrs),
}

impl AttrEdit {
    /// Multipart linkage keys always survive an edit.
    pub fn apply(&self, current: &CAttrs) -> CAttrs {
        match self {
            AttrEdit::Merge(new) => {
                let mut out = current.clone();
                out.extend(new.iter().map(|(k, v)| (k.clone(), v.clone())));
                out
            }
            AttrEdit::Replace(new) => {
                let mut out: CAttrs = current
                    .iter()
                    .filter(|(k, _)| [MP_PART, MP_PREVIOUS, MP_TOTAL].contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                out.extend(new.iter().map(|(k, v)| (k.clone(), v.clone())));
                out
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AttrEditOptions {
    /// Records per group; the local box is committed after each
    pub group_size: usize,
    pub pause: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttrEditReport {
    pub edited: usize,
    pub failed: usize,
}

pub async fn edit_attrs<L, R>(
    local: &L,
    remote: &R,
    records: Vec<FileRecord>,
    edit: &AttrEdit,
    options: AttrEditOptions,
) -> Result<AttrEditReport>
where
    L: LocalBox + ?Sized,
    R: RemoteBox + ?Sized,
{
    let mut report = AttrEditReport::default();
    let groups: Vec<&[FileRecord]> = records.chunks(options.group_size.max(1)).collect();

    for (n, group) in groups.iter().enumerate() {
        if n > 0 && !options.pause.is_zero() {
            debug!(pause_ms = options.pause.as_millis() as u64, "pausing between groups");
            tokio::time::sleep(options.pause).await;
        }
        for record in group.iter() {
            let mut updated = record.clone();
            updated.cattrs = edit.apply(&record.cattrs);
            match apply_one(local, remote, updated).await {
                Ok(()) => report.edited += 1,
                Err(e) => {
                    warn!(id = record.id, "attribute edit failed: {e:#}");
                    report.failed += 1;
                }
            }
        }
        local.commit().await?;
    }

    info!(edited = report.edited, failed = report.failed, "attributes edited");
    Ok(report)
}

async fn apply_one<L, R>(local: &L, remote: &R, record: FileRecord) -> Result<()>
where
    L: LocalBox + ?Sized,
    R: RemoteBox + ?Sized,
{
    remote.update_metadata(&record).await?;
    match local.update_file(record.clone()).await {
        Ok(()) => Ok(()),
        // edited straight on the remote box; bring it in
        Err(BoxError::LocalFileNotFound(_)) => Ok(local.import_file(record).await?),
        Err(e) => Err(e.into()),
    }
}
