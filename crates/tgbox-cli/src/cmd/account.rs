use anyhow::{bail, Context as _, Result};
use crossterm::style::Stylize;

use tgbox_core::ConnectionStatus;
use tgbox_storage::{AccountSession, StorageRoot};

use crate::context::Context;
use crate::output::{confirm, warn_line};

/// User-facing numbers start at 1.
pub(crate) fn to_index(number: usize) -> Result<usize> {
    if number == 0 {
        bail!("numbers start at 1");
    }
    Ok(number - 1)
}

pub async fn connect(
    ctx: &Context,
    name: String,
    root: String,
    endpoint: Option<String>,
    region: Option<String>,
) -> Result<()> {
    let mut store = ctx.session()?;
    let account = AccountSession::new(
        name,
        StorageRoot {
            root,
            endpoint,
            region,
        },
    );
    if account.status().await == ConnectionStatus::Disconnected {
        bail!("storage root `{}` is not reachable", account.storage.root);
    }

    let index = store.add_account(account.to_blob()?);
    store.commit()?;
    println!(
        "Connected {} as account #{}",
        account.name.as_str().bold(),
        index + 1
    );
    Ok(())
}

pub async fn list(ctx: &Context) -> Result<()> {
    let mut store = ctx.session()?;
    if store.accounts().is_empty() {
        println!("No accounts connected.");
        return Ok(());
    }

    let mut stale = Vec::new();
    let mut rows = Vec::new();
    for (i, blob) in store.accounts().iter().enumerate() {
        match AccountSession::from_blob(blob) {
            Ok(account) if account.status().await == ConnectionStatus::Connected => {
                rows.push((i, account))
            }
            Ok(account) => {
                warn_line(&format!("account `{}` is unreachable, removed", account.name));
                stale.push(i);
            }
            Err(e) => {
                warn_line(&format!("account #{} is unreadable ({e}), removed", i + 1));
                stale.push(i);
            }
        }
    }

    // highest first so earlier indices stay put
    for i in stale.iter().rev() {
        store.remove_account(*i)?;
    }
    if !stale.is_empty() {
        store.commit()?;
    }

    let current = store.current_account().map(|(i, _)| i);
    for (shown, (_, account)) in rows.iter().enumerate() {
        let marker = if current == Some(shown) { "*" } else { " " };
        println!(
            "{marker} {} {} {}",
            format!("[{}]", shown + 1).cyan(),
            account.name.as_str().bold(),
            account.storage.root.as_str().dark_grey()
        );
    }
    Ok(())
}

pub fn switch(ctx: &Context, number: usize) -> Result<()> {
    let mut store = ctx.session()?;
    store.select_account(to_index(number)?)?;
    store.commit()?;
    println!("Switched to account #{number}");
    Ok(())
}

pub fn disconnect(ctx: &Context, number: Option<usize>, force: bool) -> Result<()> {
    let mut store = ctx.session()?;
    let index = match number {
        Some(n) => to_index(n)?,
        None => store
            .current_account()
            .map(|(i, _)| i)
            .context("no account connected")?,
    };
    let name = store
        .accounts()
        .get(index)
        .and_then(|blob| AccountSession::from_blob(blob).ok())
        .map(|a| a.name)
        .unwrap_or_else(|| format!("#{}", index + 1));

    if !force && !confirm(&format!("Disconnect account `{name}`?"))? {
        println!("Aborted.");
        return Ok(());
    }
    store.remove_account(index)?;
    store.commit()?;
    println!("Disconnected `{name}`");
    Ok(())
}
