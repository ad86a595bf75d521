//! OpenDAL Operator factory for box storage roots

use std::path::Path;

use anyhow::{Context, Result};
use opendal::Operator;
use serde::{Deserialize, Serialize};

use tgbox_core::config::expand_tilde;

/// Where an account keeps its boxes.
///
/// `root` is one of:
/// - `s3://bucket[/prefix]` (credentials from the usual `AWS_*` variables)
/// - `memory://` (process-local, for tests)
/// - a filesystem directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRoot {
    pub root: String,
    /// S3 endpoint override (SeaweedFS, MinIO, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl StorageRoot {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            endpoint: None,
            region: None,
        }
    }
}

/// Build an Operator for a storage root.
pub fn build_operator(storage: &StorageRoot) -> Result<Operator> {
    if let Some(rest) = storage.root.strip_prefix("s3://") {
        return build_s3(rest, storage);
    }
    if storage.root.starts_with("memory://") {
        return Ok(Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish());
    }

    let dir = std::path::absolute(expand_tilde(Path::new(&storage.root)))
        .with_context(|| format!("resolving storage root: {}", storage.root))?;
    let builder = opendal::services::Fs::default().root(&dir.to_string_lossy());
    let op = Operator::new(builder)
        .with_context(|| format!("creating OpenDAL fs operator at {}", dir.display()))?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}

fn build_s3(rest: &str, storage: &StorageRoot) -> Result<Operator> {
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        anyhow::bail!("s3 root needs a bucket: {}", storage.root);
    }

    if let Some(endpoint) = storage.endpoint.as_deref() {
        if endpoint.starts_with("http://") {
            tracing::warn!(
                endpoint,
                "S3 endpoint uses plaintext HTTP, credentials are sent unencrypted"
            );
        }
    }

    // opendal 0.55: consuming builder; path-style addressing is the default
    let mut builder = opendal::services::S3::default()
        .bucket(bucket)
        .root(&format!("/{prefix}"))
        .region(storage.region.as_deref().unwrap_or("us-east-1"));
    if let Some(endpoint) = storage.endpoint.as_deref() {
        builder = builder.endpoint(endpoint);
    }

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();
    Ok(op)
}
