//! Encrypted session state: connected accounts and open boxes.
//!
//! One state file per session secret, at
//! `{state_dir}/tgbox-cli.{b64}.session`. First use creates it empty; a
//! commit replaces it atomically (temp file + rename).
//!
//! Two CLI processes sharing a secret are not coordinated: both read, both
//! commit, and the later commit wins.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use tgbox_core::write_private_atomic;
use tgbox_crypto::{BaseKey, StateCodec};

/// Serialized state format understood by this build.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not initialized: {0} is not set (run `tgbox-cli session-init`)")]
    NotInitialized(String),

    #[error("session secret is empty")]
    EmptySecret,

    #[error("session file {0} does not decrypt with this secret")]
    Decryption(PathBuf),

    #[error("session file {path} has format {found}, newer than supported ({supported})")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    #[error("session file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("no account #{index} ({len} connected)")]
    InvalidAccountIndex { index: usize, len: usize },

    #[error("no box #{index} ({len} open)")]
    InvalidBoxIndex { index: usize, len: usize },

    #[error("session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One opened box: where its local file is and the base key that opens it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxEntry {
    pub path: PathBuf,
    /// Hex-encoded base key
    basekey: String,
}

impl BoxEntry {
    pub fn new(path: impl Into<PathBuf>, basekey: &BaseKey) -> Self {
        Self {
            path: path.into(),
            basekey: hex::encode(basekey.as_bytes()),
        }
    }

    pub fn basekey(&self) -> anyhow::Result<BaseKey> {
        BaseKey::from_slice(&hex::decode(&self.basekey)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub version: u32,
    /// Opaque account session blobs, insertion order
    #[serde(default)]
    pub account_list: Vec<String>,
    #[serde(default)]
    pub current_account: Option<usize>,
    #[serde(default)]
    pub box_list: Vec<BoxEntry>,
    #[serde(default)]
    pub current_box: Option<usize>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            account_list: Vec::new(),
            current_account: None,
            box_list: Vec::new(),
            current_box: None,
        }
    }
}

impl SessionState {
    /// Clamp current indices into their lists.
    fn repair_indices(&mut self) {
        if self.current_account.is_some_and(|i| i >= self.account_list.len()) {
            self.current_account = None;
        }
        if self.current_box.is_some_and(|i| i >= self.box_list.len()) {
            self.current_box = None;
        }
    }
}

/// Current index after removing `removed` from a list now `len` long.
///
/// Removing the current entry falls back to the first remaining one.
fn shift_after_remove(current: Option<usize>, removed: usize, len: usize) -> Option<usize> {
    match current {
        Some(c) if c == removed => (len > 0).then_some(0),
        Some(c) if c > removed => Some(c - 1),
        other => other,
    }
}

/// Load/commit wrapper around the encrypted state file.
pub struct SessionStore {
    path: PathBuf,
    codec: StateCodec,
    state: SessionState,
}

impl SessionStore {
    /// Open the state for a secret read from the environment variable `var`.
    pub fn from_env(var: &str, state_dir: &Path) -> Result<Self, SessionError> {
        let secret = std::env::var(var).map_err(|_| SessionError::NotInitialized(var.into()))?;
        Self::open(&SecretString::from(secret), state_dir)
    }

    /// Open (or start) the state for `secret`.
    ///
    /// An absent or empty file is a fresh session; a non-empty file that does
    /// not decrypt is `Decryption`, never a silent reset.
    pub fn open(secret: &SecretString, state_dir: &Path) -> Result<Self, SessionError> {
        if secret.expose_secret().is_empty() {
            return Err(SessionError::EmptySecret);
        }
        let codec = StateCodec::new(secret);
        let path = state_dir.join(codec.file_name());

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // claim the name with an owner-only empty file
                if let Err(source) = write_private_atomic(&path, &[]) {
                    return Err(SessionError::Io { path, source });
                }
                Vec::new()
            }
            Err(source) => return Err(SessionError::Io { path, source }),
        };

        let state = if bytes.is_empty() {
            debug!(path = %path.display(), "no session state yet");
            SessionState::default()
        } else {
            decode_state(&codec, &path, &bytes)?
        };

        Ok(Self { path, codec, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Seal and atomically write the state file (mode 0600 on Unix).
    pub fn commit(&mut self) -> Result<(), SessionError> {
        self.state.repair_indices();
        let json = serde_json::to_vec(&self.state).map_err(|e| SessionError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let sealed = self.codec.encrypt(&json).map_err(|e| SessionError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        write_private_atomic(&self.path, &sealed).map_err(|source| SessionError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "session committed");
        Ok(())
    }

    // ── Accounts ─────────────────────────────────────────────────────────

    pub fn accounts(&self) -> &[String] {
        &self.state.account_list
    }

    pub fn current_account(&self) -> Option<(usize, &str)> {
        let i = self.state.current_account?;
        self.state.account_list.get(i).map(|a| (i, a.as_str()))
    }

    /// Append an account and make it current. Returns its index.
    pub fn add_account(&mut self, blob: String) -> usize {
        if let Some(i) = self.state.account_list.iter().position(|a| *a == blob) {
            self.state.current_account = Some(i);
            return i;
        }
        self.state.account_list.push(blob);
        let i = self.state.account_list.len() - 1;
        self.state.current_account = Some(i);
        info!(index = i, "account added");
        i
    }

    pub fn select_account(&mut self, index: usize) -> Result<(), SessionError> {
        let len = self.state.account_list.len();
        if index >= len {
            return Err(SessionError::InvalidAccountIndex { index, len });
        }
        self.state.current_account = Some(index);
        Ok(())
    }

    pub fn remove_account(&mut self, index: usize) -> Result<String, SessionError> {
        let len = self.state.account_list.len();
        if index >= len {
            return Err(SessionError::InvalidAccountIndex { index, len });
        }
        let blob = self.state.account_list.remove(index);
        self.state.current_account =
            shift_after_remove(self.state.current_account, index, len - 1);
        Ok(blob)
    }

    // ── Boxes ────────────────────────────────────────────────────────────

    pub fn boxes(&self) -> &[BoxEntry] {
        &self.state.box_list
    }

    pub fn current_box(&self) -> Option<(usize, &BoxEntry)> {
        let i = self.state.current_box?;
        self.state.box_list.get(i).map(|b| (i, b))
    }

    /// Add a box (or refresh the key of one at the same path) and make it
    /// current. Returns its index.
    pub fn add_box(&mut self, entry: BoxEntry) -> usize {
        let i = match self.state.box_list.iter().position(|b| b.path == entry.path) {
            Some(i) => {
                self.state.box_list[i] = entry;
                i
            }
            None => {
                self.state.box_list.push(entry);
                self.state.box_list.len() - 1
            }
        };
        self.state.current_box = Some(i);
        i
    }

    pub fn select_box(&mut self, index: usize) -> Result<(), SessionError> {
        let len = self.state.box_list.len();
        if index >= len {
            return Err(SessionError::InvalidBoxIndex { index, len });
        }
        self.state.current_box = Some(index);
        Ok(())
    }

    pub fn remove_box(&mut self, index: usize) -> Result<BoxEntry, SessionError> {
        let len = self.state.box_list.len();
        if index >= len {
            return Err(SessionError::InvalidBoxIndex { index, len });
        }
        let entry = self.state.box_list.remove(index);
        self.state.current_box = shift_after_remove(self.state.current_box, index, len - 1);
        Ok(entry)
    }
}

fn decode_state(codec: &StateCodec, path: &Path, bytes: &[u8]) -> Result<SessionState, SessionError> {
    let json = codec
        .decrypt(bytes)
        .map_err(|_| SessionError::Decryption(path.to_path_buf()))?;
    let state: SessionState =
        serde_json::from_slice(&json).map_err(|e| SessionError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if state.version > STATE_VERSION {
        return Err(SessionError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: state.version,
            supported: STATE_VERSION,
        });
    }
    let mut state = state;
    state.repair_indices();
    Ok(state)
}
