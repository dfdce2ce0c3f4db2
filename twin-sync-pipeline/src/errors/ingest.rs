//! Error types for the measure ingestion pipeline.
use thiserror::Error;
use twin_sync_repository::DocumentStoreError;
use twin_sync_shared::types::TwinId;

use crate::errors::{HistoryError, HookError, LockError};

/// Represents errors that can occur while ingesting measurements.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Document store error: {0}")]
    Store(#[from] DocumentStoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Twin {0} not found")]
    TwinNotFound(TwinId),

    #[error("Measurements can only be pushed onto an asset, got {0}")]
    TargetNotAsset(TwinId),

    /// A before-hook rejected the batch; nothing was written.
    #[error(transparent)]
    HookRejected(#[from] HookError),

    /// The bulk write of measure records partially failed.
    #[error("Measure persistence partially failed ({failures} of {total}): {first_reason}")]
    PartialPersistence {
        failures: usize,
        total: usize,
        first_reason: String,
    },
}
