//! tgbox-cli: encrypted box command-line client
//!
//! Session:
//!   session-init                      - create a session secret and state file
//!
//! Accounts:
//!   account-connect / -list / -switch / -disconnect
//!
//! Boxes:
//!   box-make / -open / -clone / -list / -switch / -close / -info / -sync
//!
//! Files (filter-driven, `key=value` tokens with `+i` / `+e` mode markers):
//!   file-search / -upload / -download / -remove / -attr-edit / -last-id / -total

mod cmd;
mod context;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use crossterm::style::Stylize;

use context::Context;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tgbox-cli",
    version,
    about = "Encrypted box client",
    long_about = "tgbox-cli: connect storage accounts, keep encrypted boxes in sync, and move files in and out of them"
)]
struct Cli {
    /// Path to config.toml (default: ~/.config/tgbox-cli/config.toml)
    #[arg(long, short = 'c', env = "TGBOX_CLI_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "TGBOX_CLI_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "TGBOX_CLI_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new session secret and its state file
    SessionInit,

    /// Connect a storage account and make it current
    AccountConnect {
        /// Display name for the account
        #[arg(long, short = 'n')]
        name: String,
        /// Storage root: a directory, or s3://bucket[/prefix]
        root: String,
        /// S3 endpoint override (SeaweedFS, MinIO, ...)
        #[arg(long)]
        endpoint: Option<String>,
        /// S3 region (default: us-east-1)
        #[arg(long)]
        region: Option<String>,
    },

    /// List connected accounts, dropping unreachable ones
    AccountList,

    /// Make another connected account current
    AccountSwitch {
        /// Account number from `account-list`
        number: usize,
    },

    /// Forget an account (default: the current one)
    AccountDisconnect {
        number: Option<usize>,
        /// Do not ask for confirmation
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Make a new box on the current account
    BoxMake {
        /// Box name
        #[arg(long, short = 'n')]
        name: String,
        /// Remote prefix inside the account (default: the box name)
        #[arg(long)]
        prefix: Option<String>,
        /// Local box file (default: ./{name}.tgbox)
        #[arg(long)]
        local: Option<PathBuf>,
        /// Deny activity log reads; other clients must use `box-sync --deep`
        #[arg(long)]
        private_log: bool,
    },

    /// Open an existing local box file with its phrase
    BoxOpen {
        /// Local box file
        path: PathBuf,
    },

    /// Build a local box for a remote box on the current account
    BoxClone {
        /// Remote prefix of the box inside the account
        prefix: String,
        /// Local box file (default: ./{box name}.tgbox)
        #[arg(long)]
        local: Option<PathBuf>,
    },

    /// List opened boxes, dropping ones whose local file is gone
    BoxList,

    /// Make another opened box current
    BoxSwitch {
        /// Box number from `box-list`
        number: usize,
    },

    /// Forget an opened box (default: the current one); files stay on disk
    BoxClose { number: Option<usize> },

    /// Show details of the current box
    BoxInfo,

    /// Bring the local box in line with the remote box
    BoxSync(SyncArgs),

    /// Search the current box
    FileSearch(SearchArgs),

    /// Upload files or directory trees into the current box
    FileUpload(UploadArgs),

    /// Download matching files into a directory
    FileDownload(DownloadArgs),

    /// Remove matching files
    FileRemove(RemoveArgs),

    /// Change custom attributes of matching files
    FileAttrEdit(AttrEditArgs),

    /// Print the highest file id in the box
    FileLastId {
        /// Ask the remote box instead of the local index
        #[arg(long)]
        remote: bool,
    },

    /// Print the number of files in the box
    FileTotal {
        #[arg(long)]
        remote: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Compare every id instead of replaying the activity log
    #[arg(long)]
    pub deep: bool,
    /// Deep sync only: skip ids at or below this one
    #[arg(long)]
    pub start_from_id: Option<u64>,
    /// Pause in seconds between deep sync batches (default from config)
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Filter tokens: key=value, +i/++include, +e/++exclude
    pub filters: Vec<String>,
    /// Search the remote box instead of the local index
    #[arg(long)]
    pub remote: bool,
    /// Highest id first
    #[arg(long, short = 'r')]
    pub reverse: bool,
    /// Stop after this many results
    #[arg(long, short = 'l')]
    pub limit: Option<usize>,
    /// Show parts of split uploads individually
    #[arg(long)]
    pub raw_parts: bool,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Files or directories to upload
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Filter token narrowing which files are uploaded (repeatable)
    #[arg(long = "filter", short = 'F')]
    pub filters: Vec<String>,
    /// Include dot-files and dot-directories
    #[arg(long)]
    pub hidden: bool,
    /// Glob of names to skip (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,
    /// Also skip files whose path and size match a record in the box
    #[arg(long)]
    pub size_match: bool,
    /// Custom attributes for every uploaded file: `key: value | key2: value2`
    #[arg(long)]
    pub cattrs: Option<String>,
    #[command(flatten)]
    pub budget: BudgetArgs,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Output directory
    pub out: PathBuf,
    /// Filter tokens
    pub filters: Vec<String>,
    /// Search the remote box instead of the local index
    #[arg(long)]
    pub force_remote: bool,
    #[arg(long, short = 'r')]
    pub reverse: bool,
    #[command(flatten)]
    pub budget: BudgetArgs,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Filter tokens
    pub filters: Vec<String>,
    /// Do not ask for confirmation
    #[arg(long, short = 'f')]
    pub force: bool,
    /// Only drop records from the local index
    #[arg(long)]
    pub local_only: bool,
    /// Search the remote box instead of the local index
    #[arg(long)]
    pub remote: bool,
}

#[derive(Args, Debug)]
pub struct AttrEditArgs {
    /// Attributes to set: `key: value | key2: value2`, or packed hex
    #[arg(long, short = 'a')]
    pub attrs: String,
    /// Drop existing attributes instead of merging
    #[arg(long)]
    pub replace: bool,
    /// Filter tokens
    pub filters: Vec<String>,
    #[arg(long)]
    pub remote: bool,
    #[arg(long, short = 'f')]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct BudgetArgs {
    /// Concurrent transfers (default from config)
    #[arg(long)]
    pub max_workers: Option<usize>,
    /// Bytes in flight across transfers (default from config)
    #[arg(long)]
    pub max_bytes: Option<u64>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = Context::load(cli.config.as_deref())?;

    let level = cli.log.unwrap_or_else(|| ctx.config.log.level.clone());
    let format = cli.log_format.unwrap_or(match ctx.config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);
    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %ctx.config_path.display(),
        "tgbox-cli starting"
    );

    match cli.command {
        Commands::SessionInit => cmd::session::init(&ctx),
        Commands::AccountConnect {
            name,
            root,
            endpoint,
            region,
        } => cmd::account::connect(&ctx, name, root, endpoint, region).await,
        Commands::AccountList => cmd::account::list(&ctx).await,
        Commands::AccountSwitch { number } => cmd::account::switch(&ctx, number),
        Commands::AccountDisconnect { number, force } => {
            cmd::account::disconnect(&ctx, number, force)
        }
        Commands::BoxMake {
            name,
            prefix,
            local,
            private_log,
        } => cmd::boxes::make(&ctx, name, prefix, local, !private_log).await,
        Commands::BoxOpen { path } => cmd::boxes::open(&ctx, &path).await,
        Commands::BoxClone { prefix, local } => cmd::boxes::clone(&ctx, &prefix, local).await,
        Commands::BoxList => cmd::boxes::list(&ctx).await,
        Commands::BoxSwitch { number } => cmd::boxes::switch(&ctx, number),
        Commands::BoxClose { number } => cmd::boxes::close(&ctx, number),
        Commands::BoxInfo => cmd::boxes::info(&ctx).await,
        Commands::BoxSync(args) => cmd::boxes::sync(&ctx, &args).await,
        Commands::FileSearch(args) => cmd::files::search(&ctx, &args).await,
        Commands::FileUpload(args) => cmd::files::upload(&ctx, &args).await,
        Commands::FileDownload(args) => cmd::files::download(&ctx, &args).await,
        Commands::FileRemove(args) => cmd::files::remove(&ctx, &args).await,
        Commands::FileAttrEdit(args) => cmd::files::attr_edit(&ctx, &args).await,
        Commands::FileLastId { remote } => cmd::files::last_id(&ctx, remote).await,
        Commands::FileTotal { remote } => cmd::files::total(&ctx, remote).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd::config::show(&ctx),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stderr keeps command output clean for pipes
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// One red line, or the whole cause chain when `TGBOX_CLI_DEBUG` is set.
fn report_error(err: &anyhow::Error) {
    if std::env::var_os("TGBOX_CLI_DEBUG").is_some() {
        eprintln!("{} {err:?}", "error:".red().bold());
    } else {
        eprintln!("{} {}", "error:".red().bold(), format!("{err:#}").red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_tree_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_filters_keep_mode_markers() {
        let cli = Cli::try_parse_from([
            "tgbox-cli",
            "file-search",
            "file_name=report",
            "+e",
            "file_name=report_draft",
            "--reverse",
        ])
        .unwrap();
        match cli.command {
            Commands::FileSearch(args) => {
                assert_eq!(args.filters, vec!["file_name=report", "+e", "file_name=report_draft"]);
                assert!(args.reverse);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_box_sync_flags() {
        let cli = Cli::try_parse_from([
            "tgbox-cli",
            "box-sync",
            "--deep",
            "--start-from-id",
            "40",
            "--timeout",
            "2",
        ])
        .unwrap();
        match cli.command {
            Commands::BoxSync(args) => {
                assert!(args.deep);
                assert_eq!(args.start_from_id, Some(40));
                assert_eq!(args.timeout, Some(2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_upload_filters_are_flagged() {
        let cli = Cli::try_parse_from([
            "tgbox-cli",
            "file-upload",
            "photos",
            "-F",
            "mime=image",
            "--exclude",
            "*.tmp",
        ])
        .unwrap();
        match cli.command {
            Commands::FileUpload(args) => {
                assert_eq!(args.paths, vec![PathBuf::from("photos")]);
                assert_eq!(args.filters, vec!["mime=image"]);
                assert_eq!(args.exclude, vec!["*.tmp"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
