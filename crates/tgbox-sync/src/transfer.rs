//! Upload and download batches.
//!
//! Uploads walk local paths, skip files the box already holds, and push the
//! rest through the [`TransferScheduler`]. Downloads write records under an
//! output directory and resume partial files at a block boundary.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use tgbox_core::{CAttrs, FileRecord};
use tgbox_filter::{FilterSet, SearchFilter};
use tgbox_storage::{BlockProgress, BoxError, LocalBox, RemoteBox, SourceFile};

use crate::scheduler::{TransferBudget, TransferScheduler};

/// Called with the number of bytes moved since the previous call.
pub type TransferProgress = Arc<dyn Fn(u64) + Send + Sync>;

/// Which local files an upload considers.
#[derive(Debug, Clone, Default)]
pub struct CollectConfig {
    /// Descend into dot-directories and take dot-files
    pub include_hidden: bool,
    /// Glob patterns matched against each file or directory name
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub collect: CollectConfig,
    /// Narrows candidates by name, path, size and mime
    pub filter: SearchFilter,
    /// Also skip a file when the box holds a record at the same path with
    /// the same size
    pub size_match: bool,
    /// Attached to every uploaded record
    pub cattrs: CAttrs,
    pub budget: TransferBudget,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: usize,
    /// Already complete on disk
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
}

/// Collect regular files under `root` (or `root` itself when it is a file).
pub fn collect_files(root: &Path, config: &CollectConfig) -> Result<Vec<PathBuf>> {
    let meta =
        std::fs::metadata(root).with_context(|| format!("stat upload path: {}", root.display()))?;
    if meta.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files = Vec::new();
    let excludes: Vec<glob::Pattern> = config
        .exclude_patterns
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect();
    collect_files_inner(root, &mut files, config, &excludes)?;
    files.sort();
    Ok(files)
}

fn collect_files_inner(
    dir: &Path,
    out: &mut Vec<PathBuf>,
    config: &CollectConfig,
    excludes: &[glob::Pattern],
) -> Result<()> {
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("reading dir: {}", dir.display()))?
    {
        let entry = entry.context("reading dir entry")?;
        let path = entry.path();
        let meta = entry.metadata().context("stat dir entry")?;

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %path.display(), "skipping non UTF-8 name");
            continue;
        };
        if excludes.iter().any(|p| p.matches(name)) {
            continue;
        }
        if name.starts_with('.') && !config.include_hidden {
            continue;
        }
        if meta.is_dir() {
            collect_files_inner(&path, out, config, excludes)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Directory a local file is recorded under: its absolute parent, `/`
/// separated.
pub fn box_dir_of(path: &Path) -> Result<String> {
    let abs = std::path::absolute(path)
        .with_context(|| format!("resolving path: {}", path.display()))?;
    let parent = abs.parent().unwrap_or(Path::new("/"));
    Ok(parent.to_string_lossy().replace('\\', "/"))
}

/// Mime type from the file extension, for the common cases.
pub fn guess_mime(file_name: &str) -> Option<String> {
    let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "toml" => "application/toml",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "7z" => "application/x-7z-compressed",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => return None,
    };
    Some(mime.to_string())
}

/// Keep only the constraints a not-yet-uploaded file can be judged by.
fn candidate_filter(filter: &SearchFilter) -> SearchFilter {
    fn narrow(set: &FilterSet) -> FilterSet {
        FilterSet {
            file_name: set.file_name.clone(),
            file_path: set.file_path.clone(),
            min_size: set.min_size.clone(),
            max_size: set.max_size.clone(),
            mime: set.mime.clone(),
            re: set.re,
            ..FilterSet::default()
        }
    }
    SearchFilter {
        include: narrow(&filter.include),
        exclude: narrow(&filter.exclude),
    }
}

fn synthetic_record(source: &SourceFile) -> FileRecord {
    FileRecord {
        id: 0,
        file_name: source.file_name.clone(),
        file_path: source.file_path.clone(),
        size: source.size,
        upload_time: 0,
        mime: source.mime.clone(),
        duration: None,
        cattrs: source.cattrs.clone(),
        file_salt: String::new(),
        imported: false,
        fingerprint: None,
    }
}

/// Turn cumulative per-file progress into deltas on the shared callback.
fn block_progress(progress: &Option<TransferProgress>) -> Option<Box<BlockProgress>> {
    let progress = progress.clone()?;
    let last = AtomicU64::new(0);
    Some(Box::new(move |done: u64| {
        let prev = last.swap(done, Ordering::Relaxed);
        progress(done.saturating_sub(prev));
    }))
}

/// Upload every file under `roots`, skipping those already in the box.
///
/// Per-file failures are logged and counted; the local box is committed
/// once at the end.
pub async fn upload_paths<L, R>(
    local: Arc<L>,
    remote: Arc<R>,
    roots: &[PathBuf],
    options: &UploadOptions,
    progress: Option<TransferProgress>,
) -> Result<UploadReport>
where
    L: LocalBox + ?Sized + 'static,
    R: RemoteBox + ?Sized + 'static,
{
    let mut report = UploadReport::default();
    let filter = candidate_filter(&options.filter);
    let mut scheduler = TransferScheduler::new(options.budget);

    for root in roots {
        for path in collect_files(root, &options.collect)? {
            let source = match describe(&path, &options.cattrs) {
                Ok(source) => source,
                Err(e) => {
                    warn!(path = %path.display(), "cannot read file: {e:#}");
                    report.failed += 1;
                    continue;
                }
            };
            if !filter.matches_record(&synthetic_record(&source)) {
                continue;
            }

            if options.size_match {
                let existing = local
                    .find_by_path(&source.file_path, &source.file_name)
                    .await?;
                if existing.is_some_and(|r| r.size == source.size) {
                    debug!(path = %path.display(), "same path and size in box, skipping");
                    report.skipped += 1;
                    continue;
                }
            }

            let prepared = match local.prepare_file(source).await {
                Ok(prepared) => prepared,
                Err(BoxError::FingerprintExists(_)) => {
                    debug!(path = %path.display(), "already uploaded");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(path = %path.display(), "prepare failed: {e}");
                    report.failed += 1;
                    continue;
                }
            };

            let size = prepared.size;
            let local = local.clone();
            let remote = remote.clone();
            let cb = block_progress(&progress);
            scheduler
                .admit(size, async move {
                    let result = async {
                        let mut file = tokio::fs::File::open(&path)
                            .await
                            .with_context(|| format!("opening {}", path.display()))?;
                        let record = remote.push_file(prepared, &mut file, cb.as_deref()).await?;
                        local.import_file(record.clone()).await?;
                        anyhow::Ok(record)
                    }
                    .await;
                    (path, result)
                })
                .await?;
        }
    }

    for (path, result) in scheduler.finish().await? {
        match result {
            Ok(record) => {
                info!(path = %path.display(), id = record.id, bytes = record.size, "uploaded");
                report.uploaded += 1;
                report.bytes += record.size;
            }
            Err(e) => {
                warn!(path = %path.display(), "upload failed: {e:#}");
                report.failed += 1;
            }
        }
    }

    local.commit().await?;
    Ok(report)
}

fn describe(path: &Path, cattrs: &CAttrs) -> Result<SourceFile> {
    let meta = std::fs::metadata(path)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("file name is not UTF-8")?
        .to_string();
    Ok(SourceFile {
        mime: guess_mime(&file_name),
        file_path: box_dir_of(path)?,
        file_name,
        size: meta.len(),
        duration: None,
        cattrs: cattrs.clone(),
    })
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("file {id} has an unsafe name {name:?}, not writing it")]
    UnsafeFileName { id: u64, name: String },
}

/// Where a record lands under `out`: `{out}/{file_path}/{file_name}`.
///
/// Directory parts that climb or are empty are dropped. The file name must
/// be a single plain component; anything else is refused.
pub fn download_target(out: &Path, record: &FileRecord) -> Result<PathBuf, TransferError> {
    let name = record.file_name.as_str();
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name() == Some(std::ffi::OsStr::new(name));
    if !plain {
        return Err(TransferError::UnsafeFileName {
            id: record.id,
            name: name.to_string(),
        });
    }

    let mut target = out.to_path_buf();
    for part in record.file_path.split(['/', '\\']) {
        match part {
            "" | "." | ".." => continue,
            part => target.push(part),
        }
    }
    target.push(name);
    Ok(target)
}

/// Download `records` from the remote box into `out`.
pub async fn download_records<R>(
    remote: Arc<R>,
    records: Vec<FileRecord>,
    out: &Path,
    budget: TransferBudget,
    progress: Option<TransferProgress>,
) -> Result<DownloadReport>
where
    R: RemoteBox + ?Sized + 'static,
{
    let mut report = DownloadReport::default();
    let mut scheduler = TransferScheduler::new(budget);

    for record in records {
        let target = match download_target(out, &record) {
            Ok(target) => target,
            Err(e) => {
                warn!(id = record.id, "{e}");
                report.failed += 1;
                continue;
            }
        };
        let remote = remote.clone();
        let progress = progress.clone();
        scheduler
            .admit(record.size, async move {
                let result = download_one(remote.as_ref(), &record, &target, progress).await;
                (record, target, result)
            })
            .await?;
    }

    for (record, target, result) in scheduler.finish().await? {
        match result {
            Ok(0) if record.size > 0 => {
                debug!(id = record.id, path = %target.display(), "already downloaded");
                report.skipped += 1;
            }
            Ok(bytes) => {
                info!(id = record.id, path = %target.display(), bytes, "downloaded");
                report.downloaded += 1;
                report.bytes += bytes;
            }
            Err(e) => {
                warn!(id = record.id, path = %target.display(), "download failed: {e:#}");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// Fetch one record, resuming a partial file. Returns bytes written.
async fn download_one<R>(
    remote: &R,
    record: &FileRecord,
    target: &Path,
    progress: Option<TransferProgress>,
) -> Result<u64>
where
    R: RemoteBox + ?Sized,
{
    let block_size = remote.block_size();
    let have = match tokio::fs::metadata(target).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e).with_context(|| format!("stat {}", target.display())),
    };
    if have == record.size && have > 0 {
        return Ok(0);
    }

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    // a partial tail block cannot be trusted, keep whole blocks only
    let start_block = if have > record.size { 0 } else { have / block_size };
    let keep = start_block * block_size;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(target)
        .await
        .with_context(|| format!("opening {}", target.display()))?;
    file.set_len(keep).await?;
    file.seek(std::io::SeekFrom::Start(keep)).await?;
    if keep > 0 {
        debug!(id = record.id, offset = keep, "resuming download");
    }

    let blocks = remote.block_count(record.id).await?;
    let mut written = 0u64;
    for block in start_block..blocks {
        let data = remote.read_block(record.id, block).await?;
        file.write_all(&data).await?;
        written += data.len() as u64;
        if let Some(progress) = &progress {
            progress(data.len() as u64);
        }
    }
    file.flush().await?;
    file.sync_all().await?;

    let total = keep + written;
    if total != record.size {
        anyhow::bail!(
            "downloaded {total} bytes for file {} but the record says {}",
            record.id,
            record.size
        );
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_skips_hidden_and_excluded() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("sub/.cache")).unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"a").unwrap();
        std::fs::write(tmp.path().join(".secret"), b"s").unwrap();
        std::fs::write(tmp.path().join("sub/b.txt"), b"b").unwrap();
        std::fs::write(tmp.path().join("sub/c.tmp"), b"c").unwrap();
        std::fs::write(tmp.path().join("sub/.cache/d"), b"d").unwrap();

        let config = CollectConfig {
            include_hidden: false,
            exclude_patterns: vec!["*.tmp".into()],
        };
        let files = collect_files(tmp.path(), &config).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(tmp.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(names, vec![PathBuf::from("a.txt"), PathBuf::from("sub/b.txt")]);

        let all = collect_files(
            tmp.path(),
            &CollectConfig {
                include_hidden: true,
                exclude_patterns: vec![],
            },
        )
        .unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_collect_single_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("one.bin");
        std::fs::write(&file, b"1").unwrap();
        assert_eq!(
            collect_files(&file, &CollectConfig::default()).unwrap(),
            vec![file]
        );
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("Report.PDF").as_deref(), Some("application/pdf"));
        assert_eq!(guess_mime("song.mp3").as_deref(), Some("audio/mpeg"));
        assert_eq!(guess_mime("Makefile"), None);
        assert_eq!(guess_mime("archive.unknown"), None);
    }

    #[test]
    fn test_download_target_stays_under_out() {
        let record = FileRecord {
            id: 1,
            file_name: "a.txt".into(),
            file_path: "/home/../etc/./docs".into(),
            size: 1,
            upload_time: 0,
            mime: None,
            duration: None,
            cattrs: CAttrs::new(),
            file_salt: String::new(),
            imported: false,
            fingerprint: None,
        };
        assert_eq!(
            download_target(Path::new("/out"), &record).unwrap(),
            PathBuf::from("/out/home/etc/docs/a.txt")
        );
    }

    #[test]
    fn test_download_target_rejects_file_name_escape() {
        let mut record = FileRecord {
            id: 7,
            file_name: String::new(),
            file_path: "/docs".into(),
            size: 1,
            upload_time: 0,
            mime: None,
            duration: None,
            cattrs: CAttrs::new(),
            file_salt: String::new(),
            imported: false,
            fingerprint: None,
        };
        for name in ["../../escape.txt", "/tmp/pwn", "..", ".", "", "a/b", "a\\b"] {
            record.file_name = name.into();
            assert!(
                matches!(
                    download_target(Path::new("/out"), &record),
                    Err(TransferError::UnsafeFileName { id: 7, .. })
                ),
                "{name:?} was accepted"
            );
        }

        record.file_name = "..hidden.txt".into();
        let target = download_target(Path::new("/out"), &record).unwrap();
        assert!(target.starts_with("/out"));
        assert_eq!(target, PathBuf::from("/out/docs/..hidden.txt"));
    }

    #[test]
    fn test_candidate_filter_drops_id_constraints() {
        let filter = tgbox_filter::compile(["min_id=5", "file_name=a", "+e", "mime=image"]).unwrap();
        let narrowed = candidate_filter(&filter);
        assert!(narrowed.include.min_id.is_empty());
        assert_eq!(narrowed.include.file_name.len(), 1);
        assert_eq!(narrowed.exclude.mime.len(), 1);
    }
}
