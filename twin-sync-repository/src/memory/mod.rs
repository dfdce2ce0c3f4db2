//! In-memory document store backend.
//!
//! Backs tests and single-process deployments so the engine does not need
//! to block on a live database. Matches the PostgreSQL backend's observable
//! behavior: create rejects duplicates, update rejects missing ids, bulk
//! writes report per-item failures.
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use twin_sync_shared::types::{MeasureRecord, TwinId};

use crate::errors::DocumentStoreError;
use crate::interfaces::{
    BulkItemError, BulkOutcome, Document, DocumentStore, SearchPage, SearchQuery, SortOrder,
};

type CollectionKey = (String, String);

/// In-memory backend keyed by (engine, collection) then document id.
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<CollectionKey, BTreeMap<String, serde_json::Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn key(engine: &str, collection: &str) -> CollectionKey {
        (engine.to_string(), collection.to_string())
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves a dotted field path (`"id.model"`) against a JSON body.
fn field_at<'a>(body: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.').try_fold(body, |value, segment| value.get(segment))
}

fn matches_filters(body: &serde_json::Value, filters: &BTreeMap<String, serde_json::Value>) -> bool {
    filters
        .iter()
        .all(|(field, expected)| field_at(body, field) == Some(expected))
}

fn compare_fields(a: &serde_json::Value, b: &serde_json::Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

/// Collects the measure records of one collection that belong to `twin`,
/// keeping the newest record per slot name.
fn newest_per_slot(
    docs: &BTreeMap<String, serde_json::Value>,
    twin: &TwinId,
) -> Vec<(String, MeasureRecord)> {
    let mut by_slot: HashMap<String, MeasureRecord> = HashMap::new();
    for body in docs.values() {
        let Ok(record) = serde_json::from_value::<MeasureRecord>(body.clone()) else {
            continue;
        };
        if !record.belongs_to(twin) {
            continue;
        }
        let Some(slot) = record.slot_for(twin) else {
            continue;
        };
        match by_slot.get(slot) {
            Some(current) if current.measured_at >= record.measured_at => {}
            _ => {
                by_slot.insert(slot.to_string(), record);
            }
        }
    }
    let mut slots: Vec<(String, MeasureRecord)> = by_slot.into_iter().collect();
    slots.sort_by(|(_, a), (_, b)| b.measured_at.cmp(&a.measured_at));
    slots
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(
        &self,
        engine: &str,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, DocumentStoreError> {
        let collections = self.collections.read().unwrap();
        Ok(collections
            .get(&Self::key(engine, collection))
            .and_then(|docs| docs.get(id))
            .map(|body| Document::new(id, body.clone())))
    }

    async fn search(
        &self,
        engine: &str,
        collection: &str,
        query: &SearchQuery,
    ) -> Result<SearchPage, DocumentStoreError> {
        let collections = self.collections.read().unwrap();
        let mut hits: Vec<Document> = collections
            .get(&Self::key(engine, collection))
            .into_iter()
            .flat_map(|docs| docs.iter())
            .filter(|(_, body)| matches_filters(body, &query.filters))
            .map(|(id, body)| Document::new(id.clone(), body.clone()))
            .collect();

        if let Some((field, order)) = &query.sort {
            hits.sort_by(|a, b| {
                let ordering = compare_fields(
                    field_at(&a.body, field).unwrap_or(&serde_json::Value::Null),
                    field_at(&b.body, field).unwrap_or(&serde_json::Value::Null),
                );
                match order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            });
        }

        let total = hits.len();
        let size = if query.size == 0 { total } else { query.size };
        let hits: Vec<Document> = hits.into_iter().skip(query.from).take(size).collect();
        Ok(SearchPage {
            hits,
            total,
            from: query.from,
            size,
        })
    }

    async fn create(
        &self,
        engine: &str,
        collection: &str,
        doc: &Document,
    ) -> Result<(), DocumentStoreError> {
        let mut collections = self.collections.write().unwrap();
        let docs = collections.entry(Self::key(engine, collection)).or_default();
        if docs.contains_key(&doc.id) {
            return Err(DocumentStoreError::AlreadyExists {
                collection: collection.to_string(),
                id: doc.id.clone(),
            });
        }
        docs.insert(doc.id.clone(), doc.body.clone());
        Ok(())
    }

    async fn update(
        &self,
        engine: &str,
        collection: &str,
        doc: &Document,
    ) -> Result<(), DocumentStoreError> {
        let mut collections = self.collections.write().unwrap();
        let docs = collections.entry(Self::key(engine, collection)).or_default();
        if !docs.contains_key(&doc.id) {
            return Err(DocumentStoreError::NotFound {
                collection: collection.to_string(),
                id: doc.id.clone(),
            });
        }
        docs.insert(doc.id.clone(), doc.body.clone());
        Ok(())
    }

    async fn delete(
        &self,
        engine: &str,
        collection: &str,
        id: &str,
    ) -> Result<(), DocumentStoreError> {
        let mut collections = self.collections.write().unwrap();
        let removed = collections
            .get_mut(&Self::key(engine, collection))
            .and_then(|docs| docs.remove(id));
        match removed {
            Some(_) => Ok(()),
            None => Err(DocumentStoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
        }
    }

    async fn bulk_create(
        &self,
        engine: &str,
        collection: &str,
        docs: &[Document],
    ) -> Result<BulkOutcome, DocumentStoreError> {
        let mut collections = self.collections.write().unwrap();
        let stored = collections.entry(Self::key(engine, collection)).or_default();
        let mut outcome = BulkOutcome::default();
        for doc in docs {
            if stored.contains_key(&doc.id) {
                outcome.errors.push(BulkItemError {
                    id: doc.id.clone(),
                    reason: "document already exists".to_string(),
                });
            } else {
                stored.insert(doc.id.clone(), doc.body.clone());
                outcome.successes += 1;
            }
        }
        Ok(outcome)
    }

    async fn bulk_update(
        &self,
        engine: &str,
        collection: &str,
        docs: &[Document],
    ) -> Result<BulkOutcome, DocumentStoreError> {
        let mut collections = self.collections.write().unwrap();
        let stored = collections.entry(Self::key(engine, collection)).or_default();
        let mut outcome = BulkOutcome::default();
        for doc in docs {
            if stored.contains_key(&doc.id) {
                stored.insert(doc.id.clone(), doc.body.clone());
                outcome.successes += 1;
            } else {
                outcome.errors.push(BulkItemError {
                    id: doc.id.clone(),
                    reason: "document not found".to_string(),
                });
            }
        }
        Ok(outcome)
    }

    async fn latest_measures(
        &self,
        engine: &str,
        collection: &str,
        twin_ids: &[TwinId],
        count: usize,
    ) -> Result<HashMap<TwinId, Vec<(String, MeasureRecord)>>, DocumentStoreError> {
        let collections = self.collections.read().unwrap();
        let mut result = HashMap::new();
        let Some(docs) = collections.get(&Self::key(engine, collection)) else {
            return Ok(result);
        };
        for twin in twin_ids {
            let mut slots = newest_per_slot(docs, twin);
            if slots.is_empty() {
                continue;
            }
            slots.truncate(count);
            result.insert(twin.clone(), slots);
        }
        Ok(result)
    }

    async fn latest_measured_at(
        &self,
        engine: &str,
        collection: &str,
        twin_ids: &[TwinId],
    ) -> Result<HashMap<TwinId, i64>, DocumentStoreError> {
        let collections = self.collections.read().unwrap();
        let mut result = HashMap::new();
        let Some(docs) = collections.get(&Self::key(engine, collection)) else {
            return Ok(result);
        };
        for twin in twin_ids {
            if let Some((_, record)) = newest_per_slot(docs, twin).into_iter().next() {
                result.insert(twin.clone(), record.measured_at);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use twin_sync_shared::types::{MeasureOrigin, TwinKind};

    fn make_record(measure_name: &str, device_id: &str, measured_at: i64) -> serde_json::Value {
        serde_json::to_value(MeasureRecord {
            id: uuid::Uuid::new_v4(),
            measure_type: "temperature".to_string(),
            measured_at,
            values: Default::default(),
            origin: MeasureOrigin::Device {
                id: device_id.to_string(),
                model: "AirSensor".to_string(),
                reference: device_id.trim_start_matches("AirSensor-").to_string(),
                measure_name: measure_name.to_string(),
            },
            asset_context: None,
            causality_ids: Vec::new(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_get_and_duplicate() {
        let store = MemoryDocumentStore::new();
        let doc = Document::new("d-1", json!({"a": 1}));
        store.create("engine-a", "devices", &doc).await.unwrap();

        let fetched = store.get("engine-a", "devices", "d-1").await.unwrap();
        assert_eq!(fetched, Some(doc.clone()));

        let err = store.create("engine-a", "devices", &doc).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::AlreadyExists { .. }));

        // Same id under another engine is a distinct document.
        store.create("engine-b", "devices", &doc).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_requires_existing_document() {
        let store = MemoryDocumentStore::new();
        let doc = Document::new("d-1", json!({"a": 1}));
        let err = store.update("engine-a", "devices", &doc).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_search_filters_and_pages() {
        let store = MemoryDocumentStore::new();
        for i in 0..5 {
            let doc = Document::new(
                format!("d-{i}"),
                json!({"model": "AirSensor", "rank": i}),
            );
            store.create("engine-a", "devices", &doc).await.unwrap();
        }
        let other = Document::new("x-1", json!({"model": "Other", "rank": 99}));
        store.create("engine-a", "devices", &other).await.unwrap();

        let query = SearchQuery::default()
            .filter("model", json!("AirSensor"))
            .page(2, 2);
        let page = store.search("engine-a", "devices", &query).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.hits.len(), 2);
        assert!(page.has_more());
    }

    #[tokio::test]
    async fn test_bulk_create_reports_partial_failure() {
        let store = MemoryDocumentStore::new();
        let first = Document::new("m-1", json!({}));
        store.create("engine-a", "measures", &first).await.unwrap();

        let outcome = store
            .bulk_create(
                "engine-a",
                "measures",
                &[first.clone(), Document::new("m-2", json!({}))],
            )
            .await
            .unwrap();
        assert_eq!(outcome.successes, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.first_error().unwrap().id, "m-1");
    }

    #[tokio::test]
    async fn test_latest_measures_groups_by_slot() {
        let store = MemoryDocumentStore::new();
        let records = [
            make_record("temperature", "AirSensor-u1", 100),
            make_record("temperature", "AirSensor-u1", 50),
            make_record("humidity", "AirSensor-u1", 80),
            make_record("temperature", "AirSensor-u2", 300),
        ];
        for (i, body) in records.iter().enumerate() {
            let doc = Document::new(format!("m-{i}"), body.clone());
            store.create("engine-a", "measures", &doc).await.unwrap();
        }

        let twin = TwinId::new(TwinKind::Device, "AirSensor", "u1");
        let result = store
            .latest_measures("engine-a", "measures", &[twin.clone()], 10)
            .await
            .unwrap();
        let slots = &result[&twin];
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].0, "temperature");
        assert_eq!(slots[0].1.measured_at, 100);
        assert_eq!(slots[1].0, "humidity");

        let at = store
            .latest_measured_at("engine-a", "measures", &[twin.clone()])
            .await
            .unwrap();
        assert_eq!(at[&twin], 100);

        // A twin with no records is omitted rather than reported empty.
        let silent = TwinId::new(TwinKind::Device, "AirSensor", "u3");
        let result = store
            .latest_measures("engine-a", "measures", &[silent.clone()], 10)
            .await
            .unwrap();
        assert!(!result.contains_key(&silent));
    }
}
