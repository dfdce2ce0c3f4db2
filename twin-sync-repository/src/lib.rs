//! # Twin Sync Repository
//! This crate provides traits and implementations for the document store
//! backing the twin synchronization engine. It includes definitions for
//! errors, interfaces, an in-memory backend and a PostgreSQL backend.
pub mod errors;
pub mod interfaces;
pub mod memory;
pub mod postgres;
pub mod source;

pub use errors::DocumentStoreError;
pub use interfaces::{
    BulkItemError, BulkOutcome, Document, DocumentStore, SearchPage, SearchQuery, SortOrder,
};
pub use memory::MemoryDocumentStore;
pub use postgres::PostgresDocumentStore;
pub use source::StoreSource;
