//! 📦 The batch upsert engine.
//!
//! A batch becomes one unordered bulk write of independent, idempotent
//! upserts keyed by name. Nothing about a batch is atomic: a record the store
//! rejects is rejected alone, and everything else in the batch still lands.
//! Submitting the same batch again converges to the same stored state, which
//! is what makes producer-side retries safe.

use tracing::{info, warn};

use super::{CompanyEngine, with_deadline};
use crate::backends::CompanyStore;
use crate::common::Company;
use crate::errors::StoreError;

impl CompanyEngine {
    /// 🚀 Upsert every record and return how many documents were modified or created.
    ///
    /// - empty input is `Ok(0)` and never touches the store
    /// - a bulk write that fails as a whole is [`StoreError::Batch`]
    /// - a bulk write where the store refused some items is
    ///   [`StoreError::PartialBatch`], after every other item has been applied
    pub async fn process_batch(&self, companies: &[Company]) -> Result<usize, StoreError> {
        if companies.is_empty() {
            return Ok(0);
        }

        let report = with_deadline(self.deadlines.batch, self.store.bulk_upsert(companies))
            .await
            .map_err(|source| StoreError::Batch {
                records: companies.len(),
                source,
            })?;

        let processed = report.processed();
        info!(
            "📦 Processed {} companies (Modified: {}, Upserted: {})",
            processed, report.modified, report.upserted
        );

        if report.rejected > 0 {
            let first_rejection = report
                .first_rejection
                .unwrap_or_else(|| String::from("no reason given"));
            warn!(
                "🧩 {} of {} companies were rejected by the store; the rest were applied. First rejection: {}",
                report.rejected,
                companies.len(),
                first_rejection
            );
            return Err(StoreError::PartialBatch {
                applied: processed,
                rejected: report.rejected,
                first_rejection,
            });
        }

        Ok(processed)
    }
}
