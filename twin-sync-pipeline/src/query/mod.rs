//! Read-only queries over the measure history.
//!
//! Answers "last N measures" and "last measured at" questions for one or
//! many twins through the store's aggregation. Takes no lock and may run
//! concurrently with any write.
use std::collections::HashMap;
use std::sync::Arc;

use twin_sync_repository::DocumentStore;
use twin_sync_shared::types::{MeasureRecord, TwinId};

use crate::errors::QueryError;
use crate::ingest::MEASURES_COLLECTION;

pub struct TwinQueryService {
    store: Arc<dyn DocumentStore>,
}

impl TwinQueryService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Most recent measure per slot for one twin, newest first, capped at
    /// `count` slots. Fails when the twin has no measure history at all.
    pub async fn get_last_measures(
        &self,
        engine: &str,
        twin_id: &TwinId,
        count: usize,
    ) -> Result<Vec<(String, MeasureRecord)>, QueryError> {
        let mut groups = self
            .store
            .latest_measures(engine, MEASURES_COLLECTION, std::slice::from_ref(twin_id), count)
            .await?;
        groups
            .remove(twin_id)
            .ok_or_else(|| QueryError::NoMeasures(twin_id.clone()))
    }

    /// Multi-twin variant of [`TwinQueryService::get_last_measures`]:
    /// twins with no history are omitted from the mapping instead of
    /// raising an error.
    pub async fn m_get_last_measures(
        &self,
        engine: &str,
        twin_ids: &[TwinId],
        count: usize,
    ) -> Result<HashMap<TwinId, Vec<(String, MeasureRecord)>>, QueryError> {
        Ok(self
            .store
            .latest_measures(engine, MEASURES_COLLECTION, twin_ids, count)
            .await?)
    }

    /// Timestamp of the most recent measure for one twin.
    pub async fn get_last_measured_at(
        &self,
        engine: &str,
        twin_id: &TwinId,
    ) -> Result<i64, QueryError> {
        let mut groups = self
            .store
            .latest_measured_at(engine, MEASURES_COLLECTION, std::slice::from_ref(twin_id))
            .await?;
        groups
            .remove(twin_id)
            .ok_or_else(|| QueryError::NoMeasures(twin_id.clone()))
    }

    /// Multi-twin variant of [`TwinQueryService::get_last_measured_at`].
    pub async fn m_get_last_measured_at(
        &self,
        engine: &str,
        twin_ids: &[TwinId],
    ) -> Result<HashMap<TwinId, i64>, QueryError> {
        Ok(self
            .store
            .latest_measured_at(engine, MEASURES_COLLECTION, twin_ids)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use twin_sync_repository::{Document, MemoryDocumentStore};
    use twin_sync_shared::types::{MeasureOrigin, TwinKind};
    use uuid::Uuid;

    async fn seed_record(
        store: &MemoryDocumentStore,
        measure_name: &str,
        measured_at: i64,
    ) {
        let record = MeasureRecord {
            id: Uuid::new_v4(),
            measure_type: "temperature".to_string(),
            measured_at,
            values: BTreeMap::new(),
            origin: MeasureOrigin::Device {
                id: "AirSensor-u1".to_string(),
                model: "AirSensor".to_string(),
                reference: "u1".to_string(),
                measure_name: measure_name.to_string(),
            },
            asset_context: None,
            causality_ids: Vec::new(),
        };
        let doc = Document::new(
            record.id.to_string(),
            serde_json::to_value(&record).unwrap(),
        );
        store
            .create("engine-a", MEASURES_COLLECTION, &doc)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_single_twin_queries() {
        let store = Arc::new(MemoryDocumentStore::new());
        seed_record(&store, "temperature", 100).await;
        seed_record(&store, "temperature", 50).await;
        seed_record(&store, "humidity", 80).await;
        let service = TwinQueryService::new(store);

        let twin = TwinId::new(TwinKind::Device, "AirSensor", "u1");
        let slots = service
            .get_last_measures("engine-a", &twin, 10)
            .await
            .unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].0, "temperature");
        assert_eq!(slots[0].1.measured_at, 100);

        let at = service
            .get_last_measured_at("engine-a", &twin)
            .await
            .unwrap();
        assert_eq!(at, 100);
    }

    #[tokio::test]
    async fn test_single_twin_with_no_history_fails() {
        let store = Arc::new(MemoryDocumentStore::new());
        let service = TwinQueryService::new(store);
        let twin = TwinId::new(TwinKind::Device, "AirSensor", "silent");

        assert!(matches!(
            service
                .get_last_measures("engine-a", &twin, 10)
                .await
                .unwrap_err(),
            QueryError::NoMeasures(_)
        ));
        assert!(matches!(
            service
                .get_last_measured_at("engine-a", &twin)
                .await
                .unwrap_err(),
            QueryError::NoMeasures(_)
        ));
    }

    #[tokio::test]
    async fn test_multi_twin_queries_omit_missing_ids() {
        let store = Arc::new(MemoryDocumentStore::new());
        seed_record(&store, "temperature", 100).await;
        let service = TwinQueryService::new(store);

        let known = TwinId::new(TwinKind::Device, "AirSensor", "u1");
        let silent = TwinId::new(TwinKind::Device, "AirSensor", "silent");
        let result = service
            .m_get_last_measures("engine-a", &[known.clone(), silent.clone()], 10)
            .await
            .unwrap();
        assert!(result.contains_key(&known));
        assert!(!result.contains_key(&silent));

        let result = service
            .m_get_last_measured_at("engine-a", &[known.clone(), silent.clone()])
            .await
            .unwrap();
        assert_eq!(result[&known], 100);
        assert!(!result.contains_key(&silent));
    }
}
