//! Storage health check

use anyhow::Result;
use opendal::Operator;

use tgbox_core::ConnectionStatus;

/// Verify the storage root is reachable by listing it
pub async fn check_health(op: &Operator) -> Result<()> {
    op.list("/")
        .await
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("storage health check failed: {e}"))
}

/// Connection status of a storage root (non-failing)
pub async fn check_connection(op: &Operator) -> ConnectionStatus {
    match check_health(op).await {
        Ok(()) => ConnectionStatus::Connected,
        Err(e) => {
            tracing::debug!(error = %e, "storage connection check failed");
            ConnectionStatus::Disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_root_is_connected() {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        assert_eq!(check_connection(&op).await, ConnectionStatus::Connected);
    }
}
