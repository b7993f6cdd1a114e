//! 🧠 The in-memory store: a `BTreeMap` doing its best impression of a document store.
//!
//! Same contract as the real thing: one document per name, unordered bulk
//! upserts where a bad item is rejected on its own, Mongo-style matched/modified
//! reporting on point updates. Handy for tests and local runs.
//!
//! ⚠️ Not for production. When the process exits, so do the companies.
//!
//! The map sits behind an `Arc<Mutex<..>>` so clones share state and tests can
//! peek at what landed. That mutex is this store's own per-document atomicity,
//! the same thing a real store gives us for free.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backends::CompanyStore;
use crate::common::{BulkUpsertReport, Company, UpdateReport};

/// 🔧 `[store.InMemory]`. Optionally pre-seeded, for demos and smoke tests.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct InMemoryStoreConfig {
    #[serde(default)]
    pub seed: Vec<Company>,
}

/// 📦 A store that lives and dies with the process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    documents: Arc<Mutex<BTreeMap<String, Company>>>,
    unreachable: Arc<AtomicBool>,
    bulk_calls: Arc<AtomicUsize>,
    close_calls: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &InMemoryStoreConfig) -> Self {
        let documents = config
            .seed
            .iter()
            .filter(|company| !company.name.is_empty())
            .map(|company| (company.name.clone(), company.clone()))
            .collect();
        Self {
            documents: Arc::new(Mutex::new(documents)),
            ..Self::default()
        }
    }

    /// 🔌 Pull the plug (or plug it back in). Every call fails while unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// 🔢 How many bulk writes actually reached the store.
    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    /// 🔢 How many times `close` was called.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// 🔍 Snapshot of everything stored, in key order.
    pub async fn snapshot(&self) -> Vec<Company> {
        self.documents.lock().await.values().cloned().collect()
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            bail!("💀 in-memory store is unreachable (the plug was pulled on purpose)");
        }
        Ok(())
    }
}

#[async_trait]
impl CompanyStore for InMemoryStore {
    async fn ping(&self) -> Result<()> {
        self.ensure_reachable()
    }

    async fn bulk_upsert(&self, companies: &[Company]) -> Result<BulkUpsertReport> {
        self.ensure_reachable()?;
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);

        let mut documents = self.documents.lock().await;
        let mut report = BulkUpsertReport::default();
        for company in companies {
            if company.name.is_empty() {
                report.rejected += 1;
                report
                    .first_rejection
                    .get_or_insert_with(|| String::from("company name must not be empty"));
                continue;
            }
            match documents.get_mut(&company.name) {
                Some(existing) if existing == company => {}
                Some(existing) => {
                    *existing = company.clone();
                    report.modified += 1;
                }
                None => {
                    documents.insert(company.name.clone(), company.clone());
                    report.upserted += 1;
                }
            }
        }
        debug!(
            "🧠 in-memory bulk upsert: {} modified, {} upserted, {} rejected",
            report.modified, report.upserted, report.rejected
        );
        Ok(report)
    }

    async fn set_treated(&self, name: &str) -> Result<UpdateReport> {
        self.ensure_reachable()?;
        let mut documents = self.documents.lock().await;
        let report = match documents.get_mut(name) {
            None => UpdateReport {
                matched: false,
                modified: false,
            },
            Some(company) if company.treated => UpdateReport {
                matched: true,
                modified: false,
            },
            Some(company) => {
                company.treated = true;
                UpdateReport {
                    matched: true,
                    modified: true,
                }
            }
        };
        Ok(report)
    }

    async fn fetch_sorted_by_name(&self) -> Result<Vec<Company>> {
        self.ensure_reachable()?;
        Ok(self.snapshot().await)
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        debug!("🗑️ in-memory store closing: nothing to release but vibes");
        Ok(())
    }
}
