//! Subcommand handlers. Each takes the per-invocation `Context` and returns
//! `anyhow::Result<()>`; `main` turns errors into exit code 1.

pub mod account;
pub mod boxes;
pub mod config;
pub mod files;
pub mod session;
