//! Error types for the history appender.
use thiserror::Error;
use twin_sync_repository::DocumentStoreError;

/// Represents errors that can occur while appending history events.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Document store error: {0}")]
    Store(#[from] DocumentStoreError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Some events of the batch were rejected by the store.
    #[error("History append partially failed ({failures} of {total}): {first_reason}")]
    PartialPersistence {
        failures: usize,
        total: usize,
        first_reason: String,
    },
}
