//! This module defines and re-exports the interfaces for the document store.
//! It serves as a central point for accessing traits related to storage.
mod store;

pub use store::{
    BulkItemError, BulkOutcome, Document, DocumentStore, SearchPage, SearchQuery, SortOrder,
};
