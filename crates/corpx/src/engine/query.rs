//! 📚 Full-collection read, ascending by name. No paging, no filters, no projection.

use super::{CompanyEngine, with_deadline};
use crate::backends::CompanyStore;
use crate::common::Company;
use crate::errors::StoreError;

impl CompanyEngine {
    pub async fn fetch_all(&self) -> Result<Vec<Company>, StoreError> {
        with_deadline(self.deadlines.fetch, self.store.fetch_sorted_by_name())
            .await
            .map_err(|source| StoreError::Query { source })
    }
}
