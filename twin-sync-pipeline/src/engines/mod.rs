//! Engine (tenant) directory.
//!
//! Engines are registered in the shared platform scope so that
//! group-scoped operations, such as model slot propagation, can find
//! every tenant they apply to.
use std::sync::Arc;

use serde_json::json;
use twin_sync_repository::{Document, DocumentStore, SearchQuery};
use twin_sync_shared::types::EngineDescriptor;

use crate::errors::EngineError;

/// Scope holding cross-tenant documents (engines, models).
pub const PLATFORM_SCOPE: &str = "platform";
pub const ENGINES_COLLECTION: &str = "engines";

pub struct EngineService {
    store: Arc<dyn DocumentStore>,
}

impl EngineService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Registers a tenant namespace.
    pub async fn create(&self, descriptor: &EngineDescriptor) -> Result<(), EngineError> {
        let doc = Document::new(descriptor.id.clone(), serde_json::to_value(descriptor)?);
        self.store
            .create(PLATFORM_SCOPE, ENGINES_COLLECTION, &doc)
            .await?;
        Ok(())
    }

    /// Fetches one engine descriptor.
    pub async fn get(&self, id: &str) -> Result<EngineDescriptor, EngineError> {
        let doc = self
            .store
            .get(PLATFORM_SCOPE, ENGINES_COLLECTION, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        Ok(serde_json::from_value(doc.body)?)
    }

    /// Lists registered engines, optionally restricted to one group.
    pub async fn list(&self, group: Option<&str>) -> Result<Vec<EngineDescriptor>, EngineError> {
        let mut query = SearchQuery::default();
        if let Some(group) = group {
            query = query.filter("group", json!(group));
        }
        let page = self
            .store
            .search(PLATFORM_SCOPE, ENGINES_COLLECTION, &query)
            .await?;
        let mut engines = Vec::with_capacity(page.hits.len());
        for hit in page.hits {
            engines.push(serde_json::from_value(hit.body)?);
        }
        Ok(engines)
    }
}
