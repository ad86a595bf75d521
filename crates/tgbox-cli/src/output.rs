//! Terminal output: record lines, sizes, times, prompts and progress bars.

use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use crossterm::style::Stylize;
use indicatif::{ProgressBar, ProgressStyle};

use tgbox_core::{BoxFile, FileRecord};
use tgbox_sync::{MultipartGroup, SearchItem};

pub fn fmt_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Upload time in local time, `DD/MM/YY, HH:MM:SS` like the filter grammar.
pub fn fmt_time(unix: i64) -> String {
    match Local.timestamp_opt(unix, 0).single() {
        Some(t) => t.format("%d/%m/%y, %H:%M:%S").to_string(),
        None => unix.to_string(),
    }
}

fn fmt_cattrs(record: &FileRecord) -> String {
    let shown: Vec<String> = record
        .cattrs
        .iter()
        .filter(|(k, _)| !k.starts_with("__mp_"))
        .map(|(k, v)| format!("{k}: {}", String::from_utf8_lossy(v)))
        .collect();
    shown.join(" | ")
}

pub fn file_line(file: &BoxFile) -> String {
    match file {
        BoxFile::Decrypted(r) => {
            let mut line = format!(
                "[{}] {} {} {} {}",
                r.id.to_string().cyan(),
                r.full_path().bold(),
                fmt_bytes(r.size).green(),
                fmt_time(r.upload_time).dark_grey(),
                r.mime.as_deref().unwrap_or("-").dark_grey(),
            );
            let cattrs = fmt_cattrs(r);
            if !cattrs.is_empty() {
                line.push_str(&format!(" ({})", cattrs.magenta()));
            }
            if r.imported {
                line.push_str(&format!(" {}", "imported".yellow()));
            }
            line
        }
        BoxFile::Encrypted(r) => format!(
            "[{}] {} {} {}",
            r.id.to_string().cyan(),
            "<encrypted>".red(),
            fmt_bytes(r.size).green(),
            fmt_time(r.upload_time).dark_grey(),
        ),
    }
}

fn group_line(group: &MultipartGroup) -> String {
    let ids: Vec<String> = group.parts.iter().map(|r| r.id.to_string()).collect();
    let total = group
        .parts
        .first()
        .and_then(|r| r.multipart())
        .map(|m| m.total)
        .unwrap_or(0);
    let state = if group.complete {
        format!("{} parts", group.parts.len()).green()
    } else {
        format!("{}/{} parts", group.parts.len(), total).red()
    };
    let path = if group.file_path.is_empty() {
        group.base_name.clone()
    } else {
        format!("{}/{}", group.file_path.trim_end_matches('/'), group.base_name)
    };
    format!(
        "[{}] {} {} ({state})",
        ids.join(",").cyan(),
        path.bold(),
        fmt_bytes(group.total_size).green(),
    )
}

pub fn item_line(item: &SearchItem) -> String {
    match item {
        SearchItem::Single(file) => file_line(file),
        SearchItem::Multipart(group) => group_line(group),
    }
}

pub fn warn_line(text: &str) {
    eprintln!("{} {text}", "warning:".yellow().bold());
}

/// Ask a yes/no question on stdin; anything but `y`/`yes` is a no.
pub fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush().context("flushing stdout")?;
    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("reading answer")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

pub fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(style("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}"));
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn make_bytes_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(style(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} {msg}",
    ));
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
