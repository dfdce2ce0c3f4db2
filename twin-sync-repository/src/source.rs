//! Storage backend selection.
//!
//! Use this to explicitly choose between the in-memory and the PostgreSQL
//! backend:
//!
//! ```ignore
//! use twin_sync_repository::StoreSource;
//!
//! // Development and tests: in-memory store
//! let store = StoreSource::mock().into_store().await?;
//!
//! // Production: PostgreSQL
//! let store = StoreSource::live("postgres://...").into_store().await?;
//! ```
use std::sync::Arc;

use crate::errors::DocumentStoreError;
use crate::interfaces::DocumentStore;
use crate::memory::MemoryDocumentStore;
use crate::postgres::PostgresDocumentStore;

/// Configuration for the document store backend.
#[derive(Debug, Clone)]
pub enum StoreSource {
    /// In-memory store for testing and single-process deployments.
    Mock,

    /// PostgreSQL storage.
    Live {
        /// PostgreSQL connection URL
        database_url: String,
    },
}

impl StoreSource {
    pub fn mock() -> Self {
        Self::Mock
    }

    pub fn live(database_url: impl Into<String>) -> Self {
        Self::Live {
            database_url: database_url.into(),
        }
    }

    /// Creates the document store with the appropriate backend.
    pub async fn into_store(self) -> Result<Arc<dyn DocumentStore>, DocumentStoreError> {
        match self {
            Self::Mock => Ok(Arc::new(MemoryDocumentStore::new())),
            Self::Live { database_url } => {
                Ok(Arc::new(PostgresDocumentStore::new(&database_url).await?))
            }
        }
    }
}
