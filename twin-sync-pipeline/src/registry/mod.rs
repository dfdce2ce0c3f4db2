//! Model registry and schema conflict detector.
//!
//! Persists versioned schema definitions for asset, device, measure and
//! group models in the shared platform scope, caches them in-process,
//! and guards every registration behind field-level conflict detection
//! so two independently registered models cannot silently corrupt a
//! field type shared across tenants.
mod conflict;

pub use conflict::{deep_merge, schema_conflicts};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};
use twin_sync_repository::{Document, DocumentStore, SearchQuery};
use twin_sync_shared::types::{
    ConflictChunk, DigitalTwin, ModelDefinition, ModelKind, TwinKind, COMMONS_GROUP,
};

use crate::engines::{EngineService, PLATFORM_SCOPE};
use crate::errors::RegistryError;
use crate::lock::LockRegistry;

pub const MODELS_COLLECTION: &str = "models";

const PROPAGATION_PAGE_SIZE: usize = 100;

pub struct ModelRegistry {
    store: Arc<dyn DocumentStore>,
    engines: Arc<EngineService>,
    locks: Arc<LockRegistry>,
    lock_timeout: Duration,
    /// Registered models keyed by document id, invalidated on registration.
    cache: RwLock<HashMap<String, ModelDefinition>>,
}

impl ModelRegistry {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        engines: Arc<EngineService>,
        locks: Arc<LockRegistry>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            store,
            engines,
            locks,
            lock_timeout,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn document_id(kind: ModelKind, name: &str) -> String {
        format!("{kind}-{name}")
    }

    /// Fetches one model by kind and name, hitting the cache first.
    pub async fn get_model(
        &self,
        kind: ModelKind,
        name: &str,
    ) -> Result<ModelDefinition, RegistryError> {
        let id = Self::document_id(kind, name);
        if let Some(model) = self.cache.read().unwrap().get(&id) {
            return Ok(model.clone());
        }
        let doc = self
            .store
            .get(PLATFORM_SCOPE, MODELS_COLLECTION, &id)
            .await?
            .ok_or_else(|| RegistryError::ModelNotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            })?;
        let model: ModelDefinition = serde_json::from_value(doc.body)?;
        self.cache.write().unwrap().insert(id, model.clone());
        Ok(model)
    }

    /// Fetches a model and checks it is visible to the given engine group:
    /// its own namespace or `commons`.
    pub async fn visible_model(
        &self,
        kind: ModelKind,
        name: &str,
        group: &str,
    ) -> Result<ModelDefinition, RegistryError> {
        let model = self.get_model(kind, name).await?;
        if model.engine_group != group && model.engine_group != COMMONS_GROUP {
            return Err(RegistryError::ModelNotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            });
        }
        Ok(model)
    }

    /// Every registered model of one kind.
    async fn list_models(&self, kind: ModelKind) -> Result<Vec<ModelDefinition>, RegistryError> {
        let query = SearchQuery::default().filter("kind", json!(kind));
        let page = self
            .store
            .search(PLATFORM_SCOPE, MODELS_COLLECTION, &query)
            .await?;
        let mut models = Vec::with_capacity(page.hits.len());
        for hit in page.hits {
            models.push(serde_json::from_value(hit.body)?);
        }
        Ok(models)
    }

    /// Computes every field-type conflict the proposed models would
    /// introduce against the registered ones, without halting early.
    pub async fn does_update_conflict(
        &self,
        proposed: &[ModelDefinition],
    ) -> Result<Vec<ConflictChunk>, RegistryError> {
        let mut chunks = Vec::new();
        for model in proposed {
            for existing in self.list_models(model.kind).await? {
                // Only models sharing a namespace can collide: the model's
                // own group, commons, or anything when the proposal itself
                // is commons-scoped.
                let shares_namespace = model.engine_group == COMMONS_GROUP
                    || existing.engine_group == model.engine_group
                    || existing.engine_group == COMMONS_GROUP;
                if !shares_namespace {
                    continue;
                }
                let merged = deep_merge(&existing.metadata_schema, &model.metadata_schema);
                let conflicts = schema_conflicts(&existing.metadata_schema, &merged);
                if !conflicts.is_empty() {
                    chunks.push(ConflictChunk {
                        source_model: existing.name.clone(),
                        new_model: model.name.clone(),
                        model_kind: model.kind,
                        conflicts,
                    });
                }
            }
        }
        Ok(chunks)
    }

    /// Registers a new or edited model.
    ///
    /// Asset and device models must only declare slots whose measure type
    /// is already registered; a schema conflict rejects the whole change
    /// with the full conflict report. On success, slots added to an
    /// existing model are propagated to every already-created twin of
    /// that model.
    pub async fn register_model(&self, model: &ModelDefinition) -> Result<(), RegistryError> {
        if matches!(model.kind, ModelKind::Asset | ModelKind::Device) {
            for slot in &model.measure_slots {
                self.get_model(ModelKind::Measure, &slot.measure_type)
                    .await
                    .map_err(|_| RegistryError::UnknownMeasureType {
                        model: model.name.clone(),
                        slot: slot.name.clone(),
                        measure_type: slot.measure_type.clone(),
                    })?;
            }
        }

        let chunks = self.does_update_conflict(std::slice::from_ref(model)).await?;
        if !chunks.is_empty() {
            return Err(RegistryError::Conflict {
                model: model.name.clone(),
                chunks,
            });
        }

        let id = model.document_id();
        let existing = self
            .store
            .get(PLATFORM_SCOPE, MODELS_COLLECTION, &id)
            .await?;
        let doc = Document::new(id.clone(), serde_json::to_value(model)?);
        match &existing {
            Some(_) => {
                self.store
                    .update(PLATFORM_SCOPE, MODELS_COLLECTION, &doc)
                    .await?
            }
            None => {
                self.store
                    .create(PLATFORM_SCOPE, MODELS_COLLECTION, &doc)
                    .await?
            }
        }
        self.cache.write().unwrap().insert(id, model.clone());
        info!(kind = %model.kind, model = %model.name, "model registered");

        // Twins created against the previous version are missing any slot
        // the edit introduced.
        if let Some(existing) = existing {
            let previous: ModelDefinition = serde_json::from_value(existing.body)?;
            let new_slots: Vec<_> = model
                .measure_slots
                .iter()
                .filter(|slot| previous.slot_names().all(|name| name != slot.name))
                .cloned()
                .collect();
            if !new_slots.is_empty() {
                self.propagate_new_slots(model, &new_slots).await?;
            }
        }
        Ok(())
    }

    /// Adds the new slot entries to every existing twin of the model, each
    /// under the twin's own lock.
    async fn propagate_new_slots(
        &self,
        model: &ModelDefinition,
        new_slots: &[twin_sync_shared::types::MeasureSlot],
    ) -> Result<(), RegistryError> {
        let kind = match model.kind {
            ModelKind::Asset => TwinKind::Asset,
            ModelKind::Device => TwinKind::Device,
            _ => return Ok(()),
        };
        let group = if model.engine_group == COMMONS_GROUP {
            None
        } else {
            Some(model.engine_group.as_str())
        };

        for engine in self.engines.list(group).await? {
            let mut from = 0;
            loop {
                let query = SearchQuery::default()
                    .filter("id.model", json!(model.name))
                    .page(from, PROPAGATION_PAGE_SIZE);
                let page = self
                    .store
                    .search(&engine.id, kind.collection(), &query)
                    .await?;
                for hit in &page.hits {
                    let _guard = self
                        .locks
                        .acquire(&lock_key_for(kind, &hit.id), self.lock_timeout)
                        .await?;
                    // Re-read under the lock so a concurrent write is not overwritten.
                    let Some(doc) = self.store.get(&engine.id, kind.collection(), &hit.id).await?
                    else {
                        continue;
                    };
                    let mut twin: DigitalTwin = serde_json::from_value(doc.body)?;
                    let mut changed = false;
                    for slot in new_slots {
                        if twin.slot(&slot.name).is_none() {
                            twin.measure_slots.push(slot.clone());
                            changed = true;
                        }
                    }
                    if changed {
                        let doc = Document::new(hit.id.clone(), serde_json::to_value(&twin)?);
                        self.store.update(&engine.id, kind.collection(), &doc).await?;
                        debug!(engine = %engine.id, twin = %twin.id, "propagated new measure slots");
                    }
                }
                if !page.has_more() {
                    break;
                }
                from += page.hits.len();
            }
        }
        Ok(())
    }
}

fn lock_key_for(kind: TwinKind, document_id: &str) -> String {
    format!("{kind}:{document_id}")
}
