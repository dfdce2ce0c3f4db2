//! Append-only writer for twin lifecycle events.
//!
//! Pure append via bulk insert: the appender never reads before writing
//! and never retries. Callers that need the audit trail durable before
//! returning await [`HistoryAppender::add`]; fire-and-forget call sites
//! use [`HistoryAppender::add_best_effort`], where a failure is logged
//! but must never fail the business operation that triggered it.
use std::sync::Arc;

use tracing::warn;
use twin_sync_repository::{Document, DocumentStore};
use twin_sync_shared::types::HistoryEvent;
use uuid::Uuid;

use crate::errors::HistoryError;

pub const HISTORY_COLLECTION: &str = "history";

pub struct HistoryAppender {
    store: Arc<dyn DocumentStore>,
}

impl HistoryAppender {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Appends events to the engine's history collection.
    pub async fn add(&self, engine: &str, events: &[HistoryEvent]) -> Result<(), HistoryError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut docs = Vec::with_capacity(events.len());
        for event in events {
            docs.push(Document::new(
                Uuid::new_v4().to_string(),
                serde_json::to_value(event)?,
            ));
        }
        let outcome = self
            .store
            .bulk_create(engine, HISTORY_COLLECTION, &docs)
            .await?;
        if let Some(first) = outcome.first_error() {
            return Err(HistoryError::PartialPersistence {
                failures: outcome.errors.len(),
                total: docs.len(),
                first_reason: first.reason.clone(),
            });
        }
        Ok(())
    }

    /// Appends events, logging instead of propagating on failure.
    pub async fn add_best_effort(&self, engine: &str, events: &[HistoryEvent]) {
        if let Err(e) = self.add(engine, events).await {
            warn!(engine, error = %e, "history append failed, event dropped");
        }
    }
}
