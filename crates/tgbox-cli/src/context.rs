//! Per-invocation context: the loaded config plus helpers that resolve the
//! session, the current account and the current box.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use secrecy::SecretString;

use tgbox_core::config::{default_config_path, load_config, CliConfig};
use tgbox_crypto::{derive_box_keys, KdfParams};
use tgbox_storage::{build_operator, AccountSession, FileLocalBox, OpendalRemoteBox};
use tgbox_sync::{SessionStore, TransferBudget};

use crate::BudgetArgs;

pub struct Context {
    pub config: CliConfig,
    pub config_path: PathBuf,
}

/// The current box, both halves opened.
pub struct OpenBox {
    pub local: FileLocalBox,
    pub remote: OpendalRemoteBox,
}

impl Context {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
        let config = load_config(&config_path)
            .with_context(|| format!("loading config: {}", config_path.display()))?;
        Ok(Self {
            config,
            config_path,
        })
    }

    /// Session state for the secret in the configured environment variable.
    pub fn session(&self) -> Result<SessionStore> {
        let state_dir = self.config.session.resolved_state_dir();
        Ok(SessionStore::from_env(&self.config.session.secret_env, &state_dir)?)
    }

    pub fn kdf(&self) -> KdfParams {
        KdfParams {
            mem_cost_kib: self.config.crypto.argon2_mem_cost_kib,
            time_cost: self.config.crypto.argon2_time_cost,
            parallelism: self.config.crypto.argon2_parallelism,
        }
    }

    pub fn budget(&self, args: &BudgetArgs) -> TransferBudget {
        TransferBudget::new(
            args.max_workers.unwrap_or(self.config.transfer.max_workers),
            args.max_bytes.unwrap_or(self.config.transfer.max_bytes),
        )
    }

    pub fn current_account(&self, store: &SessionStore) -> Result<AccountSession> {
        let (_, blob) = store
            .current_account()
            .context("no account connected (run `tgbox-cli account-connect`)")?;
        Ok(AccountSession::from_blob(blob)?)
    }

    /// Open the current box's local index and its remote box.
    pub async fn open_current_box(&self, store: &SessionStore) -> Result<OpenBox> {
        let (_, entry) = store
            .current_box()
            .context("no box opened (run `tgbox-cli box-open` or `box-make`)")?;
        let basekey = entry.basekey()?;
        let local = FileLocalBox::open(&entry.path, &basekey)
            .await
            .with_context(|| format!("opening local box {}", entry.path.display()))?;

        let location = local.remote_location().await;
        let op = build_operator(&location.storage)?;
        let remote = OpendalRemoteBox::open(op, &location.prefix, derive_box_keys(&basekey)?)
            .await
            .with_context(|| format!("opening remote box `{}`", location.prefix))?
            .with_log_window(self.config.sync.fast_window_secs as i64);

        Ok(OpenBox { local, remote })
    }
}

/// Read a box phrase from the terminal, twice when `confirm` is set.
pub fn read_phrase(confirm: bool) -> Result<SecretString> {
    let phrase = rpassword::prompt_password("Box phrase: ").context("reading box phrase")?;
    if phrase.is_empty() {
        anyhow::bail!("box phrase must not be empty");
    }
    if confirm {
        let again = rpassword::prompt_password("Repeat phrase: ").context("reading box phrase")?;
        if again != phrase {
            anyhow::bail!("phrases do not match");
        }
    }
    Ok(SecretString::from(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(ctx.config.session.secret_env, "TGBOX_CLI_SK");
        assert_eq!(ctx.config.sync.throttle_every, 100);
    }

    #[test]
    fn test_budget_flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[transfer]\nmax_workers = 2\nmax_bytes = 4096\n").unwrap();
        let ctx = Context::load(Some(&path)).unwrap();

        let budget = ctx.budget(&BudgetArgs {
            max_workers: None,
            max_bytes: None,
        });
        assert_eq!((budget.max_ops, budget.max_bytes), (2, 4096));

        let budget = ctx.budget(&BudgetArgs {
            max_workers: Some(8),
            max_bytes: None,
        });
        assert_eq!((budget.max_ops, budget.max_bytes), (8, 4096));
    }

    #[test]
    fn test_session_requires_secret_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!(
                "[session]\nsecret_env = \"TGBOX_CLI_TEST_UNSET_SK\"\nstate_dir = {:?}\n",
                dir.path().display().to_string()
            ),
        )
        .unwrap();
        let ctx = Context::load(Some(&path)).unwrap();
        let err = ctx.session().err().unwrap();
        assert!(err.to_string().contains("TGBOX_CLI_TEST_UNSET_SK"));
    }
}
