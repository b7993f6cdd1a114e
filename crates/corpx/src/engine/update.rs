//! ✏️ Point update of the `treated` flag.
//!
//! Strict on purpose: "already treated" is an error the caller has to handle,
//! not a quiet success. Callers wanting ensure-treated semantics catch
//! [`StoreError::NoOp`] and move on. Blind retries of this call will trip over
//! exactly that.

use tracing::info;

use super::{CompanyEngine, with_deadline};
use crate::backends::CompanyStore;
use crate::errors::StoreError;

impl CompanyEngine {
    pub async fn mark_treated(&self, name: &str) -> Result<(), StoreError> {
        let report = with_deadline(self.deadlines.update, self.store.set_treated(name))
            .await
            .map_err(|source| StoreError::Update {
                name: name.to_string(),
                source,
            })?;

        if !report.matched {
            return Err(StoreError::NotFound {
                name: name.to_string(),
            });
        }
        if !report.modified {
            return Err(StoreError::NoOp {
                name: name.to_string(),
            });
        }

        info!("✅ Updated treated field for company: {}", name);
        Ok(())
    }
}
