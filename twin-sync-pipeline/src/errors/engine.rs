//! Error types for the engine (tenant) directory.
use thiserror::Error;
use twin_sync_repository::DocumentStoreError;

/// Represents errors that can occur while resolving tenant namespaces.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Document store error: {0}")]
    Store(#[from] DocumentStoreError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Engine \"{0}\" not found")]
    NotFound(String),
}
