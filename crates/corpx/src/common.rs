//! 📦 Common data structures: the one entity this whole service exists for.
//!
//! A [`Company`] is three fields and a promise: there is at most one of it per
//! `name`. The store keeps that promise (the name is the document id), the
//! batch engine leans on it, and nobody in this process takes a lock for it.
//!
//! 🦆

use serde::{Deserialize, Serialize};

/// 🏢 A company record. `name` is the natural key.
///
/// Missing `address` decodes to `""` and missing `treated` decodes to `false`,
/// so a producer can send `{"name":"Acme"}` and get a fully-formed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Company {
    /// 🔑 Natural key. Globally unique, non-empty.
    pub name: String,
    /// 📬 Free-form, mutable, overwritten wholesale on every upsert.
    #[serde(default)]
    pub address: String,
    /// ✅ Processing/review status. Flipped to `true` by `mark_treated`.
    #[serde(default)]
    pub treated: bool,
}

impl Company {
    pub fn new(name: impl Into<String>, address: impl Into<String>, treated: bool) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            treated,
        }
    }
}

/// 📥 Body of `POST /api/v1/companies/batch`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CompanyBatchRequest {
    #[serde(default)]
    pub companies: Vec<Company>,
}

/// 📊 What a store reports back after an unordered bulk upsert.
///
/// `modified` counts documents changed in place, `upserted` counts documents
/// created because nothing matched. Items that matched but changed nothing
/// count toward neither. `rejected` items were refused individually by the
/// store while the rest of the batch went through.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkUpsertReport {
    pub modified: usize,
    pub upserted: usize,
    pub rejected: usize,
    /// 💀 Reason the store gave for the first rejected item, if any.
    pub first_rejection: Option<String>,
}

impl BulkUpsertReport {
    /// Caller-visible "processed" count: updated in place + newly inserted.
    pub fn processed(&self) -> usize {
        self.modified + self.upserted
    }
}

/// 🎯 Outcome of a single-document field update, Mongo-style.
///
/// `matched == false` means no document has that name. `matched && !modified`
/// means the document was already in the requested state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReport {
    pub matched: bool,
    pub modified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_a_bare_name_is_enough_to_be_a_company() -> anyhow::Result<()> {
        let company: Company = serde_json::from_str(r#"{"name":"Acme"}"#)?;
        assert_eq!(company, Company::new("Acme", "", false));
        Ok(())
    }

    #[test]
    fn the_one_where_a_batch_without_companies_is_just_empty() -> anyhow::Result<()> {
        let request: CompanyBatchRequest = serde_json::from_str("{}")?;
        assert!(request.companies.is_empty());
        Ok(())
    }

    #[test]
    fn the_one_where_processed_counts_both_kinds_of_writes() {
        let report = BulkUpsertReport {
            modified: 2,
            upserted: 3,
            rejected: 1,
            first_rejection: Some("nope".into()),
        };
        assert_eq!(report.processed(), 5);
    }
}
