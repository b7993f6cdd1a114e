//! 🔌 Backends: where the real I/O happens.
//!
//! 🎭 This module is the casting agency for document stores. Need a real
//! cluster over HTTP? Need a HashMap in a trench coat for tests? We've got a
//! backend for that.
//!
//! It is also the connection manager: [`open`] builds the pooled handle,
//! proves the store is alive, and makes sure the collection exists with
//! `name` as its unique key before anybody gets to write. A store that can't
//! do all three never becomes a handle.
//!
//! Each backend speaks in the store's own vocabulary (matched, modified,
//! upserted). Turning that into the service's error contract is the engine's
//! job, not ours.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::app_config::{RuntimeConfig, StoreConfig};
use crate::common::{BulkUpsertReport, Company, UpdateReport};
use crate::errors::StoreError;

pub mod elasticsearch;
pub mod in_mem;

pub use elasticsearch::{ElasticsearchStore, ElasticsearchStoreConfig};
pub use in_mem::{InMemoryStore, InMemoryStoreConfig};

/// 🗄️ A document store holding companies keyed by `name`.
///
/// # Contract
/// - At most one document per `name`, enforced by the store itself.
/// - `bulk_upsert` is unordered: every item is applied or rejected on its own,
///   and a rejected item never stops the others. A returned `Err` means the
///   bulk write failed as a whole.
/// - Implementations are shared across request tasks and must be safe for
///   concurrent use without the caller taking any lock.
#[async_trait]
pub trait CompanyStore: std::fmt::Debug + Send + Sync {
    /// 🩺 Cheap liveness probe against the store.
    async fn ping(&self) -> Result<()>;

    /// 📦 Full-document upsert of every record, keyed by `name`, in one unordered bulk write.
    async fn bulk_upsert(&self, companies: &[Company]) -> Result<BulkUpsertReport>;

    /// ✏️ Set `treated = true` on the document named `name`, touching nothing else.
    async fn set_treated(&self, name: &str) -> Result<UpdateReport>;

    /// 📚 Every document, ascending by `name`. Server-side cursors are released before returning.
    async fn fetch_sorted_by_name(&self) -> Result<Vec<Company>>;

    /// 🗑️ Release pooled connections.
    async fn close(&self) -> Result<()>;
}

/// 🎭 The many faces of a store. Dispatches to the concrete backend so the
/// engine never has to know whether it's talking to RAM or a cluster.
#[derive(Debug)]
pub enum StoreBackend {
    InMemory(InMemoryStore),
    Elasticsearch(ElasticsearchStore),
}

#[async_trait]
impl CompanyStore for StoreBackend {
    async fn ping(&self) -> Result<()> {
        match self {
            StoreBackend::InMemory(store) => store.ping().await,
            StoreBackend::Elasticsearch(store) => store.ping().await,
        }
    }

    async fn bulk_upsert(&self, companies: &[Company]) -> Result<BulkUpsertReport> {
        match self {
            StoreBackend::InMemory(store) => store.bulk_upsert(companies).await,
            StoreBackend::Elasticsearch(store) => store.bulk_upsert(companies).await,
        }
    }

    async fn set_treated(&self, name: &str) -> Result<UpdateReport> {
        match self {
            StoreBackend::InMemory(store) => store.set_treated(name).await,
            StoreBackend::Elasticsearch(store) => store.set_treated(name).await,
        }
    }

    async fn fetch_sorted_by_name(&self) -> Result<Vec<Company>> {
        match self {
            StoreBackend::InMemory(store) => store.fetch_sorted_by_name().await,
            StoreBackend::Elasticsearch(store) => store.fetch_sorted_by_name().await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            StoreBackend::InMemory(store) => store.close().await,
            StoreBackend::Elasticsearch(store) => store.close().await,
        }
    }
}

/// 🚀 Open the configured store: build the pool, ping, ensure the unique key.
///
/// Anything that goes wrong here is a [`StoreError::Connection`]. The process
/// should not start serving on top of a store it could not verify.
pub async fn open(
    store_config: &StoreConfig,
    runtime: &RuntimeConfig,
) -> Result<StoreBackend, StoreError> {
    match store_config {
        StoreConfig::InMemory(config) => {
            info!("🧠 Using the in-memory store. Nothing survives a restart. Plan accordingly.");
            Ok(StoreBackend::InMemory(InMemoryStore::from_config(config)))
        }
        StoreConfig::Elasticsearch(config) => {
            let store = ElasticsearchStore::open(config.clone(), runtime)
                .await
                .map_err(|source| StoreError::Connection {
                    endpoint: config.url.clone(),
                    source,
                })?;
            info!(
                "✅ Connected to {} (collection '{}', pool size {})",
                config.url,
                store.collection(),
                runtime.effective_pool_size()
            );
            Ok(StoreBackend::Elasticsearch(store))
        }
    }
}
