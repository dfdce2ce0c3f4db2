//! Error types for the twin query service.
use thiserror::Error;
use twin_sync_repository::DocumentStoreError;
use twin_sync_shared::types::TwinId;

/// Represents errors that can occur while querying measure history.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Document store error: {0}")]
    Store(#[from] DocumentStoreError),

    /// Single-id lookups fail when the aggregation returns no group for
    /// the id; multi-id lookups omit the id instead.
    #[error("No measure history for twin {0}")]
    NoMeasures(TwinId),
}
