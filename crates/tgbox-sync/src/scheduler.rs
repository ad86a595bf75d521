//! Transfer admission control.
//!
//! Transfers run as tokio tasks gated by two semaphores: one permit per
//! concurrent operation, and one permit per KiB in flight. A transfer is
//! admitted once both have room. A transfer bigger than the whole byte pool
//! asks for the whole pool, so it starts only when nothing else is running.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const BYTE_UNIT: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferBudget {
    pub max_ops: usize,
    pub max_bytes: u64,
}

impl TransferBudget {
    pub fn new(max_ops: usize, max_bytes: u64) -> Self {
        Self { max_ops, max_bytes }
    }
}

pub struct TransferScheduler<T> {
    ops: Arc<Semaphore>,
    bytes: Arc<Semaphore>,
    byte_pool: u32,
    tasks: JoinSet<T>,
    done: Vec<T>,
}

impl<T: Send + 'static> TransferScheduler<T> {
    pub fn new(budget: TransferBudget) -> Self {
        let byte_pool = (budget.max_bytes / BYTE_UNIT).clamp(1, u32::MAX as u64) as u32;
        Self {
            ops: Arc::new(Semaphore::new(budget.max_ops.max(1))),
            bytes: Arc::new(Semaphore::new(byte_pool as usize)),
            byte_pool,
            tasks: JoinSet::new(),
            done: Vec::new(),
        }
    }

    /// Permits a transfer of `size` bytes asks for.
    fn need(&self, size: u64) -> u32 {
        size.div_ceil(BYTE_UNIT).min(self.byte_pool as u64) as u32
    }

    /// Wait for headroom, then start `transfer` in the background.
    pub async fn admit<F>(&mut self, size: u64, transfer: F) -> Result<()>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let need = self.need(size);
        let op_permit = self
            .ops
            .clone()
            .acquire_owned()
            .await
            .context("transfer pool closed")?;
        let byte_permit = self
            .bytes
            .clone()
            .acquire_many_owned(need)
            .await
            .context("transfer pool closed")?;

        tracing::debug!(size, kib = need, "transfer admitted");
        self.tasks.spawn(async move {
            let out = transfer.await;
            drop(byte_permit);
            drop(op_permit);
            out
        });

        while let Some(joined) = self.tasks.try_join_next() {
            self.done.push(joined.context("transfer task panicked")?);
        }
        Ok(())
    }

    /// Wait for every admitted transfer; results in completion order.
    pub async fn finish(mut self) -> Result<Vec<T>> {
        while let Some(joined) = self.tasks.join_next().await {
            self.done.push(joined.context("transfer task panicked")?);
        }
        Ok(self.done)
    }
}
