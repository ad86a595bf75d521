use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{TgboxError, TgboxResult};

/// Top-level CLI configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub session: SessionConfig,
    pub sync: SyncConfig,
    pub transfer: TransferConfig,
    pub batch: BatchConfig,
    pub crypto: CryptoConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding encrypted session files (default: system temp dir)
    pub state_dir: Option<PathBuf>,
    /// Environment variable carrying the session secret
    pub secret_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Deep sync sleeps `timeout_secs` after this many files
    pub throttle_every: usize,
    /// Default throttle pause in seconds
    pub timeout_secs: u64,
    /// Ids fetched per page when listing a box
    pub page_size: usize,
    /// Activity log retention window assumed for fast sync (seconds)
    pub fast_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum concurrent uploads/downloads
    pub max_workers: usize,
    /// Maximum bytes in flight across all transfers
    pub max_bytes: u64,
    /// Content block size in bytes
    pub block_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Records per attribute-edit group
    pub attr_edit_group: usize,
    /// Pause between attribute-edit groups (milliseconds)
    pub attr_edit_pause_ms: u64,
}

/// Argon2id parameters for deriving a Box base key from a phrase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub argon2_time_cost: u32,
    /// Parallelism (default: 4)
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: warn)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            secret_env: "TGBOX_CLI_SK".into(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            throttle_every: 100,
            timeout_secs: 15,
            page_size: 100,
            fast_window_secs: 48 * 3600,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            max_bytes: 1_000_000_000,
            block_size: 512 * 1024,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            attr_edit_group: 100,
            attr_edit_pause_ms: 2000,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "text".into(),
        }
    }
}

impl SessionConfig {
    /// Directory for session files: configured path or the system temp dir.
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Default config location: `~/.config/tgbox-cli/config.toml`
pub fn default_config_path() -> PathBuf {
    expand_tilde(Path::new("~/.config/tgbox-cli/config.toml"))
}

/// Parse a config file, falling back to defaults if it does not exist.
pub fn load_config(path: &Path) -> TgboxResult<CliConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(CliConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| TgboxError::Config(format!("parsing {}: {e}", path.display())))
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
