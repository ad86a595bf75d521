use anyhow::{Context as _, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use secrecy::SecretString;

use tgbox_sync::SessionStore;

use crate::context::Context;

/// Generate a session secret, create its state file and print the export
/// line for the shell.
pub fn init(ctx: &Context) -> Result<()> {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let secret = URL_SAFE_NO_PAD.encode(raw);

    let state_dir = ctx.config.session.resolved_state_dir();
    let mut store = SessionStore::open(&SecretString::from(secret.clone()), &state_dir)
        .context("creating session state")?;
    store.commit()?;
    tracing::info!(path = %store.path().display(), "session initialized");

    println!("# Run this in your shell to start the session:");
    println!("export {}={secret}", ctx.config.session.secret_env);
    Ok(())
}
