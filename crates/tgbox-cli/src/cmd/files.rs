use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use crossterm::style::Stylize;

use tgbox_core::{parse_cattrs_arg, BoxFile, CAttrs, FileRecord};
use tgbox_filter::compile;
use tgbox_storage::RecordSource;
use tgbox_sync::{
    collect_files, download_records, edit_attrs, remove_files, AttrEdit, AttrEditOptions,
    Coalescer, CollectConfig, SearchCursor, SearchOptions, TransferProgress, UploadOptions,
};

use crate::context::{Context, OpenBox};
use crate::output::{confirm, file_line, fmt_bytes, item_line, make_bytes_bar, warn_line};
use crate::{AttrEditArgs, DownloadArgs, RemoveArgs, SearchArgs, UploadArgs};

fn source_of(opened: &OpenBox, remote: bool) -> &dyn RecordSource {
    if remote {
        &opened.remote
    } else {
        &opened.local
    }
}

/// Every match for `tokens`, in search order.
async fn find(
    ctx: &Context,
    source: &dyn RecordSource,
    tokens: &[String],
    reverse: bool,
) -> Result<Vec<BoxFile>> {
    let filter = compile(tokens)?;
    let options = SearchOptions {
        reverse,
        page_size: ctx.config.sync.page_size,
    };
    Ok(SearchCursor::new(source, filter, options).collect_all().await?)
}

fn decrypted(files: Vec<BoxFile>) -> (Vec<FileRecord>, usize) {
    let total = files.len();
    let records: Vec<FileRecord> = files.into_iter().filter_map(BoxFile::into_decrypted).collect();
    let sealed = total - records.len();
    (records, sealed)
}

pub async fn search(ctx: &Context, args: &SearchArgs) -> Result<()> {
    let store = ctx.session()?;
    let opened = ctx.open_current_box(&store).await?;
    let source = source_of(&opened, args.remote);

    let filter = compile(&args.filters)?;
    let page_size = ctx.config.sync.page_size;
    let mut cursor = SearchCursor::new(
        source,
        filter,
        SearchOptions {
            reverse: args.reverse,
            page_size,
        },
    );
    let mut coalescer = Coalescer::new(source, page_size).raw_parts(args.raw_parts);

    let limit = args.limit.unwrap_or(usize::MAX);
    let mut shown = 0usize;
    'pages: loop {
        let page = cursor.next_page(page_size).await?;
        if page.is_empty() {
            break;
        }
        for file in page {
            if let Some(item) = coalescer.push(file).await? {
                println!("{}", item_line(&item));
                shown += 1;
                if shown >= limit {
                    break 'pages;
                }
            }
        }
    }

    if shown == 0 {
        println!("No files found.");
    } else {
        println!(
            "{}",
            format!("{shown} items, {} total", fmt_bytes(coalescer.total_size())).dark_grey()
        );
    }
    Ok(())
}

pub async fn upload(ctx: &Context, args: &UploadArgs) -> Result<()> {
    let store = ctx.session()?;
    let opened = ctx.open_current_box(&store).await?;

    let cattrs = match &args.cattrs {
        Some(text) => parse_cattrs_arg(text).context("parsing --cattrs")?,
        None => CAttrs::new(),
    };
    let options = UploadOptions {
        collect: CollectConfig {
            include_hidden: args.hidden,
            exclude_patterns: args.exclude.clone(),
        },
        filter: compile(&args.filters)?,
        size_match: args.size_match,
        cattrs,
        budget: ctx.budget(&args.budget),
    };

    let mut total = 0u64;
    for root in &args.paths {
        for path in collect_files(root, &options.collect)? {
            total += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        }
    }
    let pb = make_bytes_bar(total, "upload");
    let bar = pb.clone();
    let progress: TransferProgress = Arc::new(move |delta: u64| bar.inc(delta));

    let report = tgbox_sync::upload_paths(
        Arc::new(opened.local),
        Arc::new(opened.remote),
        &args.paths,
        &options,
        Some(progress),
    )
    .await;
    pb.finish_and_clear();
    let report = report?;

    println!(
        "Uploaded {} files ({}), {} already in the box",
        report.uploaded,
        fmt_bytes(report.bytes),
        report.skipped
    );
    if report.failed > 0 {
        warn_line(&format!("{} files failed, see the log", report.failed));
    }
    Ok(())
}

pub async fn download(ctx: &Context, args: &DownloadArgs) -> Result<()> {
    let store = ctx.session()?;
    let opened = ctx.open_current_box(&store).await?;
    let files = find(
        ctx,
        source_of(&opened, args.force_remote),
        &args.filters,
        args.reverse,
    )
    .await?;
    let (records, sealed) = decrypted(files);
    if sealed > 0 {
        warn_line(&format!("{sealed} matches do not open with this box key"));
    }
    if records.is_empty() {
        println!("No files found.");
        return Ok(());
    }

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("creating {}", args.out.display()))?;
    let total: u64 = records.iter().map(|r| r.size).sum();
    let pb = make_bytes_bar(total, "download");
    let bar = pb.clone();
    let progress: TransferProgress = Arc::new(move |delta: u64| bar.inc(delta));

    let report = download_records(
        Arc::new(opened.remote),
        records,
        &args.out,
        ctx.budget(&args.budget),
        Some(progress),
    )
    .await;
    pb.finish_and_clear();
    let report = report?;

    println!(
        "Downloaded {} files ({}) into {}, {} already complete",
        report.downloaded,
        fmt_bytes(report.bytes),
        args.out.display(),
        report.skipped
    );
    if report.failed > 0 {
        warn_line(&format!("{} files failed, see the log", report.failed));
    }
    Ok(())
}

pub async fn remove(ctx: &Context, args: &RemoveArgs) -> Result<()> {
    let store = ctx.session()?;
    let opened = ctx.open_current_box(&store).await?;
    let files = find(ctx, source_of(&opened, args.remote), &args.filters, false).await?;
    if files.is_empty() {
        println!("No files found.");
        return Ok(());
    }

    if !args.force {
        for file in &files {
            println!("{}", file_line(file));
        }
        let scope = if args.local_only {
            "from the local box"
        } else {
            "from the local and remote box"
        };
        if !confirm(&format!("Remove {} files {scope}?", files.len()))? {
            println!("Aborted.");
            return Ok(());
        }
    }

    let ids: Vec<u64> = files.iter().map(BoxFile::id).collect();
    let report = remove_files(
        &opened.local,
        (!args.local_only).then_some(&opened.remote),
        &ids,
    )
    .await?;
    println!(
        "Removed {} files from the remote box and {} from the local box",
        report.remote_deleted, report.local_deleted
    );
    Ok(())
}

pub async fn attr_edit(ctx: &Context, args: &AttrEditArgs) -> Result<()> {
    let store = ctx.session()?;
    let opened = ctx.open_current_box(&store).await?;

    let attrs = parse_cattrs_arg(&args.attrs).context("parsing --attrs")?;
    let edit = if args.replace {
        AttrEdit::Replace(attrs)
    } else {
        AttrEdit::Merge(attrs)
    };

    let files = find(ctx, source_of(&opened, args.remote), &args.filters, false).await?;
    let (records, sealed) = decrypted(files);
    if sealed > 0 {
        warn_line(&format!("{sealed} matches do not open with this box key"));
    }
    if records.is_empty() {
        println!("No files found.");
        return Ok(());
    }
    if !args.force && !confirm(&format!("Edit attributes of {} files?", records.len()))? {
        println!("Aborted.");
        return Ok(());
    }

    let options = AttrEditOptions {
        group_size: ctx.config.batch.attr_edit_group,
        pause: Duration::from_millis(ctx.config.batch.attr_edit_pause_ms),
    };
    let report = edit_attrs(&opened.local, &opened.remote, records, &edit, options).await?;
    println!("Edited {} files", report.edited);
    if report.failed > 0 {
        warn_line(&format!("{} files failed, see the log", report.failed));
    }
    Ok(())
}

pub async fn last_id(ctx: &Context, remote: bool) -> Result<()> {
    let store = ctx.session()?;
    let opened = ctx.open_current_box(&store).await?;
    match source_of(&opened, remote).last_file_id().await? {
        Some(id) => println!("{id}"),
        None => println!("{}", "Box is empty.".dark_grey()),
    }
    Ok(())
}

pub async fn total(ctx: &Context, remote: bool) -> Result<()> {
    let store = ctx.session()?;
    let opened = ctx.open_current_box(&store).await?;
    println!("{}", source_of(&opened, remote).files_total().await?);
    Ok(())
}
