//! # Twin Sync Pipeline
//! This crate implements the synchronization engine for digital twins:
//! per-entity locking, the measure ingestion pipeline, the link manager,
//! the model registry with conflict detection, the history appender and
//! the query service, all over an abstract multi-tenant document store.
pub mod config;
pub mod engines;
pub mod errors;
pub mod history;
pub mod hooks;
pub mod ingest;
pub mod link;
pub mod lock;
pub mod query;
pub mod registry;
pub mod twins;

pub use config::EngineConfig;

use std::sync::Arc;
use std::time::Duration;

use twin_sync_repository::{DocumentStore, DocumentStoreError};

use crate::engines::EngineService;
use crate::history::HistoryAppender;
use crate::hooks::HookRegistry;
use crate::ingest::MeasureIngester;
use crate::link::LinkManager;
use crate::lock::LockRegistry;
use crate::query::TwinQueryService;
use crate::registry::ModelRegistry;
use crate::twins::TwinService;

/// The assembled synchronization engine.
///
/// Modules are wired by direct interface injection: services that need a
/// sibling hold an `Arc` to it rather than going through an indirection
/// bus, which keeps the coupling explicit and typed.
pub struct SyncEngine {
    store: Arc<dyn DocumentStore>,
    pub hooks: Arc<HookRegistry>,
    pub engines: Arc<EngineService>,
    pub models: Arc<ModelRegistry>,
    pub links: Arc<LinkManager>,
    pub twins: Arc<TwinService>,
    pub ingest: Arc<MeasureIngester>,
    pub query: Arc<TwinQueryService>,
}

impl SyncEngine {
    /// Builds the engine from configuration, connecting the selected
    /// storage backend.
    pub async fn new(config: EngineConfig) -> Result<Self, DocumentStoreError> {
        let store = config.store.clone().into_store().await?;
        Ok(Self::with_store(store, config.lock_timeout))
    }

    /// Builds the engine over an already constructed store.
    pub fn with_store(store: Arc<dyn DocumentStore>, lock_timeout: Duration) -> Self {
        let locks = Arc::new(LockRegistry::new());
        let hooks = Arc::new(HookRegistry::new());
        let history = Arc::new(HistoryAppender::new(store.clone()));
        let engines = Arc::new(EngineService::new(store.clone()));
        let models = Arc::new(ModelRegistry::new(
            store.clone(),
            engines.clone(),
            locks.clone(),
            lock_timeout,
        ));
        let links = Arc::new(LinkManager::new(
            store.clone(),
            locks.clone(),
            history.clone(),
            lock_timeout,
        ));
        let twins = Arc::new(TwinService::new(
            store.clone(),
            locks.clone(),
            hooks.clone(),
            history.clone(),
            engines.clone(),
            models.clone(),
            links.clone(),
            lock_timeout,
        ));
        let ingest = Arc::new(MeasureIngester::new(
            store.clone(),
            locks,
            hooks.clone(),
            history,
            lock_timeout,
        ));
        let query = Arc::new(TwinQueryService::new(store.clone()));

        Self {
            store,
            hooks,
            engines,
            models,
            links,
            twins,
            ingest,
            query,
        }
    }

    /// The underlying document store.
    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }
}
