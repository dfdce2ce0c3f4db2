//! Error types for the model registry and conflict detector.
use thiserror::Error;
use twin_sync_repository::DocumentStoreError;
use twin_sync_shared::types::ConflictChunk;

use crate::errors::{EngineError, LockError};

/// Represents errors that can occur while registering or resolving models.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Document store error: {0}")]
    Store(#[from] DocumentStoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unknown {kind} model \"{name}\"")]
    ModelNotFound { kind: String, name: String },

    /// An asset/device model declared a slot whose measure type has no
    /// registered measure model; the slot could never be mapped.
    #[error("Measure slot \"{slot}\" of model \"{model}\" references undefined measure type \"{measure_type}\"")]
    UnknownMeasureType {
        model: String,
        slot: String,
        measure_type: String,
    },

    /// The proposed change would corrupt a field type shared with one or
    /// more registered models.
    #[error("Model \"{model}\" conflicts with {count} registered model(s)", count = .chunks.len())]
    Conflict {
        model: String,
        chunks: Vec<ConflictChunk>,
    },
}
