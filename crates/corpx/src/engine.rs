//! ⚙️ The engine: the operations the service actually offers, on top of a store handle.
//!
//! Every call here borrows the shared [`StoreBackend`] for exactly one
//! operation, runs it under that operation's deadline, and translates whatever
//! the store said into a [`StoreError`] with context. That's the whole job.
//!
//! There is deliberately no lock in here. Two batches racing on the same name
//! race at the store, where the unique key and per-document atomic upserts
//! settle it: last write observed wins. A key lock in this process would not
//! cover a second instance and would only look like it helps.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use tracing::{info, warn};

use crate::app_config::DeadlineConfig;
use crate::backends::{CompanyStore, StoreBackend};
use crate::errors::StoreError;

mod batch;
mod query;
mod update;

/// ⏱️ Budgets for each kind of store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    pub health: Duration,
    pub batch: Duration,
    pub update: Duration,
    pub fetch: Duration,
}

impl From<&DeadlineConfig> for Deadlines {
    fn from(config: &DeadlineConfig) -> Self {
        Self {
            health: Duration::from_secs(config.health_secs),
            batch: Duration::from_secs(config.batch_secs),
            update: Duration::from_secs(config.update_secs),
            fetch: Duration::from_secs(config.fetch_secs),
        }
    }
}

impl Default for Deadlines {
    fn default() -> Self {
        Self::from(&DeadlineConfig::default())
    }
}

/// 🏭 Batch upserts, point updates, full reads, and the health probe, over one store.
#[derive(Debug)]
pub struct CompanyEngine {
    store: StoreBackend,
    deadlines: Deadlines,
    closed: AtomicBool,
}

/// ⏳ Run a store call under a budget. Running out of time is just another
/// store failure, so it comes back as one, for the caller to wrap.
pub(crate) async fn with_deadline<T>(
    budget: Duration,
    call: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("⏱️ deadline of {:?} elapsed before the store answered", budget)),
    }
}

impl CompanyEngine {
    pub fn new(store: StoreBackend, deadlines: Deadlines) -> Self {
        Self {
            store,
            deadlines,
            closed: AtomicBool::new(false),
        }
    }

    /// 🩺 Re-ping the store. A failure here is transient, not fatal.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        with_deadline(self.deadlines.health, self.store.ping())
            .await
            .map_err(|source| StoreError::Health { source })
    }

    /// 🗑️ Release the store's pool. Only the first call does anything.
    pub async fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            warn!("⚠️ Store close requested twice. Ignoring the encore.");
            return Ok(());
        }
        self.store.close().await?;
        info!("🗑️ Store connection released");
        Ok(())
    }
}
