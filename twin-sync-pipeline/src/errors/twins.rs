//! Error types for the twin lifecycle service.
use thiserror::Error;
use twin_sync_repository::DocumentStoreError;
use twin_sync_shared::types::TwinId;

use crate::errors::{EngineError, HistoryError, HookError, LinkError, LockError, RegistryError};

/// Represents errors that can occur while provisioning or mutating twins.
#[derive(Debug, Error)]
pub enum TwinsError {
    #[error("Document store error: {0}")]
    Store(#[from] DocumentStoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    HookRejected(#[from] HookError),

    #[error("Twin {0} not found")]
    TwinNotFound(TwinId),

    #[error("Twin {0} already exists")]
    TwinAlreadyExists(TwinId),

    #[error("Metadata field \"{field}\" is not declared by model \"{model}\"")]
    UnknownMetadataField { model: String, field: String },

    #[error("Metadata field \"{field}\" does not match the {expected} type declared by model \"{model}\"")]
    MetadataTypeMismatch {
        model: String,
        field: String,
        expected: String,
    },
}
