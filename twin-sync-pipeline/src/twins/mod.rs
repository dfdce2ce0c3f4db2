//! Twin lifecycle service: provisioning, metadata updates, deletion.
//!
//! Creation shapes the twin from its registered model; metadata updates
//! run under the twin's lock with before/after hooks; deletion cascades
//! an unlink of every peer.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, instrument, warn};
use twin_sync_repository::{Document, DocumentStore, DocumentStoreError};
use twin_sync_shared::types::{
    DigitalTwin, HistoryEvent, HistoryEventKind, MetadataValue, ModelDefinition, ModelKind, TwinId,
    TwinKind,
};

use crate::engines::EngineService;
use crate::errors::TwinsError;
use crate::history::HistoryAppender;
use crate::hooks::HookRegistry;
use crate::link::LinkManager;
use crate::lock::LockRegistry;
use crate::registry::ModelRegistry;

pub struct TwinService {
    store: Arc<dyn DocumentStore>,
    locks: Arc<LockRegistry>,
    hooks: Arc<HookRegistry>,
    history: Arc<HistoryAppender>,
    engines: Arc<EngineService>,
    models: Arc<ModelRegistry>,
    links: Arc<LinkManager>,
    lock_timeout: Duration,
}

impl TwinService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        locks: Arc<LockRegistry>,
        hooks: Arc<HookRegistry>,
        history: Arc<HistoryAppender>,
        engines: Arc<EngineService>,
        models: Arc<ModelRegistry>,
        links: Arc<LinkManager>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            store,
            locks,
            hooks,
            history,
            engines,
            models,
            links,
            lock_timeout,
        }
    }

    /// Provisions a twin from its registered model.
    #[instrument(skip(self, metadata))]
    pub async fn create_twin(
        &self,
        engine_id: &str,
        id: TwinId,
        metadata: BTreeMap<String, MetadataValue>,
    ) -> Result<DigitalTwin, TwinsError> {
        let engine = self.engines.get(engine_id).await?;
        let model_kind = match id.kind {
            TwinKind::Asset => ModelKind::Asset,
            TwinKind::Device => ModelKind::Device,
        };
        let model = self
            .models
            .visible_model(model_kind, &id.model, &engine.group)
            .await?;
        validate_metadata(&model, &metadata)?;

        let twin = DigitalTwin {
            metadata,
            measure_slots: model.measure_slots.clone(),
            ..DigitalTwin::new(id.clone(), engine_id)
        };

        let _guard = self
            .locks
            .acquire(&id.lock_key(), self.lock_timeout)
            .await?;
        let doc = Document::new(id.document_id(), serde_json::to_value(&twin)?);
        self.store
            .create(engine_id, id.kind.collection(), &doc)
            .await
            .map_err(|e| match e {
                DocumentStoreError::AlreadyExists { .. } => TwinsError::TwinAlreadyExists(id.clone()),
                other => TwinsError::Store(other),
            })?;
        self.history
            .add(
                engine_id,
                &[HistoryEvent::now(
                    id.clone(),
                    HistoryEventKind::Metadata,
                    json!({"metadata": twin.metadata}),
                )],
            )
            .await?;
        info!(engine = engine_id, twin = %id, "twin created");
        Ok(twin)
    }

    /// Fetches one twin. Read-only, lock-free.
    pub async fn get_twin(&self, engine: &str, id: &TwinId) -> Result<DigitalTwin, TwinsError> {
        let doc = self
            .store
            .get(engine, id.kind.collection(), &id.document_id())
            .await?
            .ok_or_else(|| TwinsError::TwinNotFound(id.clone()))?;
        Ok(serde_json::from_value(doc.body)?)
    }

    /// Applies a metadata patch under the twin's lock.
    ///
    /// Before-hooks may rewrite the patch and abort the update; after-hook
    /// failures are logged but do not fail the committed write.
    #[instrument(skip(self, patch))]
    pub async fn update_metadata(
        &self,
        engine_id: &str,
        id: &TwinId,
        mut patch: BTreeMap<String, MetadataValue>,
    ) -> Result<DigitalTwin, TwinsError> {
        let engine = self.engines.get(engine_id).await?;
        let _guard = self
            .locks
            .acquire(&id.lock_key(), self.lock_timeout)
            .await?;
        let mut twin = self.get_twin(engine_id, id).await?;

        for hook in self.hooks.twin_update_hooks(engine_id) {
            hook.update_before(&twin, &mut patch).await?;
        }

        let model_kind = match id.kind {
            TwinKind::Asset => ModelKind::Asset,
            TwinKind::Device => ModelKind::Device,
        };
        let model = self
            .models
            .visible_model(model_kind, &id.model, &engine.group)
            .await?;
        validate_metadata(&model, &patch)?;

        for (field, value) in patch {
            twin.metadata.insert(field, value);
        }
        let doc = Document::new(id.document_id(), serde_json::to_value(&twin)?);
        self.store
            .update(engine_id, id.kind.collection(), &doc)
            .await?;
        self.history
            .add(
                engine_id,
                &[HistoryEvent::now(
                    id.clone(),
                    HistoryEventKind::Metadata,
                    json!({"metadata": twin.metadata}),
                )],
            )
            .await?;

        for hook in self.hooks.twin_update_hooks(engine_id) {
            if let Err(e) = hook.update_after(&twin).await {
                warn!(engine = engine_id, twin = %id, error = %e, "twin update after-hook failed");
            }
        }
        Ok(twin)
    }

    /// Deletes a twin and cascades an unlink of every peer.
    #[instrument(skip(self))]
    pub async fn delete_twin(&self, engine_id: &str, id: &TwinId) -> Result<(), TwinsError> {
        let peers = {
            let _guard = self
                .locks
                .acquire(&id.lock_key(), self.lock_timeout)
                .await?;
            let twin = self.get_twin(engine_id, id).await?;
            self.store
                .delete(engine_id, id.kind.collection(), &id.document_id())
                .await?;
            twin.links.into_iter().map(|l| l.peer).collect::<Vec<_>>()
        };

        // Peers are detached after the twin's own lock is released; each
        // detach takes only the peer's lock, so two concurrent deletes
        // cannot deadlock each other.
        for peer in peers {
            self.links.detach_peer(engine_id, &peer, id).await?;
        }
        info!(engine = engine_id, twin = %id, "twin deleted");
        Ok(())
    }
}

fn validate_metadata(
    model: &ModelDefinition,
    metadata: &BTreeMap<String, MetadataValue>,
) -> Result<(), TwinsError> {
    for (field, value) in metadata {
        let field_type = model.metadata_schema.get(field).ok_or_else(|| {
            TwinsError::UnknownMetadataField {
                model: model.name.clone(),
                field: field.clone(),
            }
        })?;
        if !value.matches(field_type) {
            return Err(TwinsError::MetadataTypeMismatch {
                model: model.name.clone(),
                field: field.clone(),
                expected: field_type.type_name(),
            });
        }
    }
    Ok(())
}
