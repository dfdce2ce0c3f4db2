//! This module defines the `DocumentStore` trait, which provides an
//! interface for interacting with the underlying multi-tenant document
//! store. It abstracts single-document operations, partial-failure-tolerant
//! bulk writes, paginated search, and the one aggregation the engine needs.
use std::collections::{BTreeMap, HashMap};

use twin_sync_shared::types::{MeasureRecord, TwinId};

use crate::errors::DocumentStoreError;

/// A stored document: its id plus the raw JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: serde_json::Value,
}

impl Document {
    pub fn new(id: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}

/// Sort direction for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// An equality-filtered, paginated search over one collection.
///
/// Filters match top-level document fields exactly; there is no query
/// planner behind this interface.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub filters: BTreeMap<String, serde_json::Value>,
    pub from: usize,
    pub size: usize,
    pub sort: Option<(String, SortOrder)>,
}

impl SearchQuery {
    pub fn filter(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.filters.insert(field.into(), value);
        self
    }

    pub fn page(mut self, from: usize, size: usize) -> Self {
        self.from = from;
        self.size = size;
        self
    }
}

/// One page of search hits, resumable via `from`/`size`.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub hits: Vec<Document>,
    pub total: usize,
    pub from: usize,
    pub size: usize,
}

impl SearchPage {
    /// Whether another page exists past this one.
    pub fn has_more(&self) -> bool {
        self.from + self.hits.len() < self.total
    }
}

/// Per-item failure inside a bulk write.
#[derive(Debug, Clone)]
pub struct BulkItemError {
    pub id: String,
    pub reason: String,
}

/// Outcome of a partial-failure-tolerant bulk write.
#[derive(Debug, Clone, Default)]
pub struct BulkOutcome {
    pub successes: usize,
    pub errors: Vec<BulkItemError>,
}

impl BulkOutcome {
    /// First failure reason, when any item was rejected.
    pub fn first_error(&self) -> Option<&BulkItemError> {
        self.errors.first()
    }
}

/// A trait that defines the interface for the multi-tenant document store.
///
/// Implementors provide single-document CRUD, paginated search, bulk
/// writes that tolerate per-item failure, and the latest-measure
/// aggregation consumed by the query service.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetches one document by id.
    ///
    /// # Arguments
    ///
    /// * `engine` - Tenant namespace the collection belongs to.
    /// * `collection` - Name of the collection to read from.
    /// * `id` - Document id.
    ///
    /// # Returns
    ///
    /// A `Result` holding the document, or `None` when the id is absent.
    async fn get(
        &self,
        engine: &str,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, DocumentStoreError>;

    /// Runs an equality-filtered, paginated search over a collection.
    ///
    /// # Arguments
    ///
    /// * `engine` - Tenant namespace the collection belongs to.
    /// * `collection` - Name of the collection to search.
    /// * `query` - Filters, pagination window and optional sort.
    ///
    /// # Returns
    ///
    /// A `Result` holding one resumable [`SearchPage`] of hits.
    async fn search(
        &self,
        engine: &str,
        collection: &str,
        query: &SearchQuery,
    ) -> Result<SearchPage, DocumentStoreError>;

    /// Creates a document.
    ///
    /// # Returns
    ///
    /// A `Result` indicating success, or
    /// [`DocumentStoreError::AlreadyExists`] when the id is taken.
    async fn create(
        &self,
        engine: &str,
        collection: &str,
        doc: &Document,
    ) -> Result<(), DocumentStoreError>;

    /// Replaces an existing document.
    ///
    /// # Returns
    ///
    /// A `Result` indicating success, or [`DocumentStoreError::NotFound`]
    /// when the id is absent.
    async fn update(
        &self,
        engine: &str,
        collection: &str,
        doc: &Document,
    ) -> Result<(), DocumentStoreError>;

    /// Deletes a document.
    ///
    /// # Returns
    ///
    /// A `Result` indicating success, or [`DocumentStoreError::NotFound`]
    /// when the id is absent.
    async fn delete(
        &self,
        engine: &str,
        collection: &str,
        id: &str,
    ) -> Result<(), DocumentStoreError>;

    /// Inserts many documents, collecting per-item failures instead of
    /// aborting the batch.
    ///
    /// # Arguments
    ///
    /// * `engine` - Tenant namespace the collection belongs to.
    /// * `collection` - Name of the collection to insert into.
    /// * `docs` - Documents to insert (an empty slice is a no-op).
    ///
    /// # Returns
    ///
    /// A `Result` holding the [`BulkOutcome`] with per-item successes and
    /// errors.
    async fn bulk_create(
        &self,
        engine: &str,
        collection: &str,
        docs: &[Document],
    ) -> Result<BulkOutcome, DocumentStoreError>;

    /// Replaces many documents, collecting per-item failures instead of
    /// aborting the batch.
    ///
    /// # Returns
    ///
    /// A `Result` holding the [`BulkOutcome`] with per-item successes and
    /// errors.
    async fn bulk_update(
        &self,
        engine: &str,
        collection: &str,
        docs: &[Document],
    ) -> Result<BulkOutcome, DocumentStoreError>;

    /// Aggregates the most recent measure record per slot name for each
    /// requested twin.
    ///
    /// # Arguments
    ///
    /// * `engine` - Tenant namespace holding the measure collection.
    /// * `collection` - Name of the measure collection.
    /// * `twin_ids` - Twins to aggregate for.
    /// * `count` - Maximum number of slots returned per twin.
    ///
    /// # Returns
    ///
    /// A `Result` holding, per twin, its `(slot, record)` pairs newest
    /// first. Twins with no records are simply absent from the map.
    async fn latest_measures(
        &self,
        engine: &str,
        collection: &str,
        twin_ids: &[TwinId],
        count: usize,
    ) -> Result<HashMap<TwinId, Vec<(String, MeasureRecord)>>, DocumentStoreError>;

    /// Degenerate form of [`DocumentStore::latest_measures`] without the
    /// per-slot grouping: the single newest `measured_at` per twin.
    async fn latest_measured_at(
        &self,
        engine: &str,
        collection: &str,
        twin_ids: &[TwinId],
    ) -> Result<HashMap<TwinId, i64>, DocumentStoreError>;
}
