use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use crossterm::style::Stylize;
use rand::RngCore;

use tgbox_core::ConnectionStatus;
use tgbox_crypto::{derive_box_keys, make_basekey, SALT_SIZE};
use tgbox_storage::{
    build_operator, check_connection, FileLocalBox, MakeOptions, OpendalRemoteBox, RecordSource,
    RemoteLocation,
};
use tgbox_filter::SearchFilter;
use tgbox_sync::{BoxEntry, SearchCursor, SearchOptions, SyncEngine, SyncOptions, SyncReport};

use crate::cmd::account::to_index;
use crate::context::{read_phrase, Context};
use crate::output::{fmt_bytes, make_progress_bar, warn_line};
use crate::SyncArgs;

fn local_path(local: Option<PathBuf>, name: &str) -> Result<PathBuf> {
    let path = local.unwrap_or_else(|| PathBuf::from(format!("{name}.tgbox")));
    std::path::absolute(&path).with_context(|| format!("resolving {}", path.display()))
}

pub async fn make(
    ctx: &Context,
    name: String,
    prefix: Option<String>,
    local: Option<PathBuf>,
    log_readable: bool,
) -> Result<()> {
    let mut store = ctx.session()?;
    let account = ctx.current_account(&store)?;
    let path = local_path(local, &name)?;

    let phrase = read_phrase(true)?;
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    let basekey = make_basekey(&phrase, &salt, &ctx.kdf())?;
    let keys = derive_box_keys(&basekey)?;

    let prefix = prefix.unwrap_or_else(|| name.clone());
    let remote = OpendalRemoteBox::make(
        account.operator()?,
        &prefix,
        &name,
        &salt,
        keys.clone(),
        MakeOptions {
            block_size: ctx.config.transfer.block_size as u64,
            log_readable,
        },
    )
    .await
    .context("creating remote box")?;

    let location = RemoteLocation {
        storage: account.storage.clone(),
        prefix: remote.prefix().to_string(),
    };
    FileLocalBox::make(&path, &name, location, salt, keys)
        .await
        .context("creating local box")?;

    let index = store.add_box(BoxEntry::new(&path, &basekey));
    store.commit()?;
    println!(
        "Made box {} as #{} ({})",
        name.as_str().bold(),
        index + 1,
        path.display()
    );
    if !log_readable {
        println!("The activity log is private: other clients need `box-sync --deep`.");
    }
    Ok(())
}

pub async fn open(ctx: &Context, path: &Path) -> Result<()> {
    let mut store = ctx.session()?;
    let path = std::path::absolute(path).with_context(|| format!("resolving {}", path.display()))?;
    let phrase = read_phrase(false)?;
    let (local, basekey) = FileLocalBox::open_with_phrase(&path, &phrase, &ctx.kdf())
        .await
        .with_context(|| format!("opening {}", path.display()))?;

    let index = store.add_box(BoxEntry::new(&path, &basekey));
    store.commit()?;
    println!("Opened box {} as #{}", local.name().await.bold(), index + 1);
    Ok(())
}

/// Make a local box for an existing remote box, then fill it with a deep sync.
pub async fn clone(ctx: &Context, prefix: &str, local: Option<PathBuf>) -> Result<()> {
    let mut store = ctx.session()?;
    let account = ctx.current_account(&store)?;
    let op = account.operator()?;

    let header = OpendalRemoteBox::read_header(&op, prefix).await?;
    let path = local_path(local, &header.name)?;
    let salt = header.salt()?;

    let phrase = read_phrase(false)?;
    let basekey = make_basekey(&phrase, &salt, &ctx.kdf())?;
    let keys = derive_box_keys(&basekey)?;
    let remote = OpendalRemoteBox::open(op, prefix, keys.clone())
        .await
        .context("opening remote box")?
        .with_log_window(ctx.config.sync.fast_window_secs as i64);

    let location = RemoteLocation {
        storage: account.storage.clone(),
        prefix: remote.prefix().to_string(),
    };
    let local = FileLocalBox::make(&path, &header.name, location, salt, keys)
        .await
        .context("creating local box")?;

    // registered before syncing so an interrupted clone resumes with box-sync
    let index = store.add_box(BoxEntry::new(&path, &basekey));
    store.commit()?;

    let options = SyncOptions {
        deep: true,
        ..sync_defaults(ctx)
    };
    let report = run_sync(&local, &remote, options).await?;
    println!(
        "Cloned box {} as #{} ({} files)",
        header.name.as_str().bold(),
        index + 1,
        report.imported
    );
    Ok(())
}

pub async fn list(ctx: &Context) -> Result<()> {
    let mut store = ctx.session()?;
    let missing: Vec<usize> = store
        .boxes()
        .iter()
        .enumerate()
        .filter(|(_, b)| !b.path.exists())
        .map(|(i, _)| i)
        .collect();
    for i in missing.iter().rev() {
        let entry = store.remove_box(*i)?;
        warn_line(&format!("{} is gone, removed", entry.path.display()));
    }
    if !missing.is_empty() {
        store.commit()?;
    }

    if store.boxes().is_empty() {
        println!("No boxes opened.");
        return Ok(());
    }
    let current = store.current_box().map(|(i, _)| i);
    for (i, entry) in store.boxes().iter().enumerate() {
        let marker = if current == Some(i) { "*" } else { " " };
        let name = match entry.basekey() {
            Ok(key) => match FileLocalBox::open(&entry.path, &key).await {
                Ok(local) => local.name().await,
                Err(e) => format!("<{e}>"),
            },
            Err(e) => format!("<{e}>"),
        };
        println!(
            "{marker} {} {} {}",
            format!("[{}]", i + 1).cyan(),
            name.bold(),
            entry.path.display().to_string().dark_grey()
        );
    }
    Ok(())
}

pub fn switch(ctx: &Context, number: usize) -> Result<()> {
    let mut store = ctx.session()?;
    store.select_box(to_index(number)?)?;
    store.commit()?;
    println!("Switched to box #{number}");
    Ok(())
}

pub fn close(ctx: &Context, number: Option<usize>) -> Result<()> {
    let mut store = ctx.session()?;
    let index = match number {
        Some(n) => to_index(n)?,
        None => store.current_box().map(|(i, _)| i).context("no box opened")?,
    };
    let entry = store.remove_box(index)?;
    store.commit()?;
    println!("Closed {}", entry.path.display());
    Ok(())
}

pub async fn info(ctx: &Context) -> Result<()> {
    let store = ctx.session()?;
    let opened = ctx.open_current_box(&store).await?;
    let location = opened.local.remote_location().await;

    let status = match build_operator(&location.storage) {
        Ok(op) => check_connection(&op).await,
        Err(_) => ConnectionStatus::Disconnected,
    };
    let status = match status {
        ConnectionStatus::Connected => "connected".green(),
        ConnectionStatus::Disconnected => "disconnected".red(),
    };

    let local_total = opened.local.files_total().await?;
    let local_last = opened.local.last_file_id().await?;
    let remote_total = opened.remote.files_total().await?;
    let remote_last = opened.remote.last_file_id().await?;

    let bytes: u64 = SearchCursor::new(&opened.local, SearchFilter::new(), SearchOptions::default())
        .collect_all()
        .await?
        .iter()
        .map(|f| f.size())
        .sum();

    println!("Name:         {}", opened.local.name().await.bold());
    println!("Local file:   {}", opened.local.path().display());
    println!("Storage:      {} ({status})", location.storage.root);
    println!("Prefix:       {}", location.prefix);
    println!(
        "Local files:  {local_total} ({}), last id {}",
        fmt_bytes(bytes),
        fmt_id(local_last)
    );
    println!("Remote files: {remote_total}, last id {}", fmt_id(remote_last));
    if remote_last > local_last {
        println!("{}", "Local box is behind; run `box-sync`.".yellow());
    }
    Ok(())
}

fn fmt_id(id: Option<u64>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "-".into())
}

fn sync_defaults(ctx: &Context) -> SyncOptions {
    SyncOptions {
        deep: false,
        start_from: None,
        page_size: ctx.config.sync.page_size,
        throttle_every: ctx.config.sync.throttle_every,
        timeout: Duration::from_secs(ctx.config.sync.timeout_secs),
    }
}

pub async fn sync(ctx: &Context, args: &SyncArgs) -> Result<()> {
    let store = ctx.session()?;
    let opened = ctx.open_current_box(&store).await?;

    let mut options = SyncOptions {
        deep: args.deep,
        start_from: args.start_from_id,
        ..sync_defaults(ctx)
    };
    if let Some(secs) = args.timeout {
        options.timeout = Duration::from_secs(secs);
    }

    let report = run_sync(&opened.local, &opened.remote, options).await?;
    if report.log_denied {
        warn_line(
            "the activity log of this box is private; run `box-sync --deep` \
             or ask the box owner for log access",
        );
        return Ok(());
    }
    println!(
        "Synced: {} imported, {} updated, {} deleted",
        report.imported, report.updated, report.deleted
    );
    if report.undecryptable > 0 {
        warn_line(&format!(
            "{} remote files do not open with this box key and were skipped",
            report.undecryptable
        ));
    }
    Ok(())
}

async fn run_sync(
    local: &FileLocalBox,
    remote: &OpendalRemoteBox,
    options: SyncOptions,
) -> Result<SyncReport> {
    let pb = make_progress_bar(0, options.mode().to_string().as_str());
    let bar = pb.clone();
    let mut engine = SyncEngine::new(local, remote, options).with_progress(Box::new(
        move |current: u64, total: u64| {
            bar.set_length(total);
            bar.set_position(current);
        },
    ));
    let result = engine.run().await;
    pb.finish_and_clear();
    Ok(result?)
}
