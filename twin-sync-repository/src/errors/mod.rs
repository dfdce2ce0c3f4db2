//! Error types for the document store backends.
use thiserror::Error;

/// Represents errors that can occur while talking to the document store.
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("Document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },
}
