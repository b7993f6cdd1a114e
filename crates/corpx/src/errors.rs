//! 💀 The error taxonomy: every way talking to the document store can go sideways,
//! sorted into the buckets callers actually branch on.
//!
//! Drivers speak `anyhow` internally (context chains are the best postmortem we
//! have). At the seam between the store and everyone else, those chains get
//! wrapped into a [`StoreError`] that says which operation failed and, where it
//! makes sense, for which key. The transport never reinterprets these. It only
//! picks a status code.

use std::error::Error as _;

use thiserror::Error;

/// 🏷️ What went wrong, and during which operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// 🔌 Startup-time: the store is unreachable or misconfigured. Fatal.
    #[error("failed to connect to the document store at '{endpoint}'")]
    Connection {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    /// 🩺 Request-time: the store stopped answering pings. Transient.
    #[error("document store health check failed")]
    Health {
        #[source]
        source: anyhow::Error,
    },

    /// 📦 The bulk write as a whole failed. No per-record attribution.
    #[error("failed to process batch of {records} companies")]
    Batch {
        records: usize,
        #[source]
        source: anyhow::Error,
    },

    /// 🧩 The bulk write went through but the store refused some items.
    /// Every other item in the batch was applied.
    #[error(
        "batch partially applied: {applied} processed, {rejected} rejected (first rejection: {first_rejection})"
    )]
    PartialBatch {
        applied: usize,
        rejected: usize,
        first_rejection: String,
    },

    /// 🔍 No document carries this name.
    #[error("company not found: {name}")]
    NotFound { name: String },

    /// 😐 The document matched but was already treated; nothing changed.
    #[error("company found but no update performed: {name}")]
    NoOp { name: String },

    /// ✏️ The point update itself failed at the store.
    #[error("failed to update treated field for company '{name}'")]
    Update {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// 📚 Reading or decoding the collection failed.
    #[error("failed to fetch companies")]
    Query {
        #[source]
        source: anyhow::Error,
    },
}

impl StoreError {
    /// 🧅 The full story: this error's message followed by every cause, `: `-joined.
    ///
    /// Used for the human-readable `message` of failure envelopes, where the
    /// driver's text is allowed to leak through.
    pub fn detailed_message(&self) -> String {
        let mut message = self.to_string();
        let mut cause = self.source();
        while let Some(err) = cause {
            message.push_str(": ");
            message.push_str(&err.to_string());
            cause = err.source();
        }
        message
    }

    /// ✅ `true` for the per-key outcomes that are expected, not server faults.
    pub fn is_expected_outcome(&self) -> bool {
        matches!(self, StoreError::NotFound { .. } | StoreError::NoOp { .. })
    }
}
