//! PostgreSQL implementation of the document store.
//!
//! All engines share one `documents` table keyed by (engine, collection,
//! id) with a jsonb body, so tenant isolation is a key prefix rather than
//! a schema concern. Queries are runtime-checked; the latest-measure
//! aggregation ranks records per slot with a window function.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE documents (
//!     engine      TEXT NOT NULL,
//!     collection  TEXT NOT NULL,
//!     id          TEXT NOT NULL,
//!     body        JSONB NOT NULL,
//!     PRIMARY KEY (engine, collection, id)
//! );
//! ```
use std::collections::HashMap;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Postgres, Row};
use twin_sync_shared::types::{MeasureRecord, TwinId, TwinKind};

use crate::errors::DocumentStoreError;
use crate::interfaces::{
    BulkItemError, BulkOutcome, Document, DocumentStore, SearchPage, SearchQuery, SortOrder,
};

/// PostgreSQL backend with connection pooling.
pub struct PostgresDocumentStore {
    pool: sqlx::Pool<Postgres>,
}

impl PostgresDocumentStore {
    /// Creates a new store connected to the database.
    pub async fn new(database_url: &str) -> Result<Self, DocumentStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: sqlx::Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn ranked_query(kind: TwinKind) -> &'static str {
        // Slot attribution differs per side: a device groups by the origin
        // measure name, an asset by the slot the record was routed to.
        match kind {
            TwinKind::Device => {
                "SELECT slot, body FROM ( \
                   SELECT body->'origin'->>'measure_name' AS slot, body, \
                          ROW_NUMBER() OVER ( \
                            PARTITION BY body->'origin'->>'measure_name' \
                            ORDER BY (body->>'measured_at')::bigint DESC \
                          ) AS rn \
                   FROM documents \
                   WHERE engine = $1 AND collection = $2 \
                     AND body->'origin'->>'id' = $3 \
                 ) ranked WHERE rn = 1 \
                 ORDER BY (body->>'measured_at')::bigint DESC \
                 LIMIT $4"
            }
            TwinKind::Asset => {
                "SELECT slot, body FROM ( \
                   SELECT body->'asset_context'->>'asset_slot' AS slot, body, \
                          ROW_NUMBER() OVER ( \
                            PARTITION BY body->'asset_context'->>'asset_slot' \
                            ORDER BY (body->>'measured_at')::bigint DESC \
                          ) AS rn \
                   FROM documents \
                   WHERE engine = $1 AND collection = $2 \
                     AND body->'asset_context'->'asset_id' = $3::jsonb \
                 ) ranked WHERE rn = 1 \
                 ORDER BY (body->>'measured_at')::bigint DESC \
                 LIMIT $4"
            }
        }
    }

    /// Bind value selecting the twin's records: the document id for a
    /// device, the jsonb-encoded id for an asset.
    fn twin_selector(twin: &TwinId) -> Result<String, DocumentStoreError> {
        match twin.kind {
            TwinKind::Device => Ok(twin.document_id()),
            TwinKind::Asset => Ok(serde_json::to_string(twin)?),
        }
    }
}

/// Expands dotted filter paths into the nested object shape expected by
/// the jsonb containment operator, e.g. `"id.model": "Room"` becomes
/// `{"id": {"model": "Room"}}`.
fn containment_filter(
    filters: &std::collections::BTreeMap<String, serde_json::Value>,
) -> serde_json::Value {
    let mut root = serde_json::Map::new();
    for (path, expected) in filters {
        let mut segments = path.split('.').rev();
        let leaf = segments.next().unwrap_or(path.as_str());
        let mut nested = serde_json::Value::Object(
            [(leaf.to_string(), expected.clone())].into_iter().collect(),
        );
        for segment in segments {
            nested = serde_json::Value::Object(
                [(segment.to_string(), nested)].into_iter().collect(),
            );
        }
        merge_object(&mut root, nested);
    }
    serde_json::Value::Object(root)
}

fn merge_object(target: &mut serde_json::Map<String, serde_json::Value>, incoming: serde_json::Value) {
    let serde_json::Value::Object(incoming) = incoming else {
        return;
    };
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(serde_json::Value::Object(existing)), serde_json::Value::Object(nested)) => {
                merge_object(existing, serde_json::Value::Object(nested));
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn get(
        &self,
        engine: &str,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, DocumentStoreError> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            "SELECT body FROM documents WHERE engine = $1 AND collection = $2 AND id = $3",
        )
        .bind(engine)
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(body,)| Document::new(id, body)))
    }

    async fn search(
        &self,
        engine: &str,
        collection: &str,
        query: &SearchQuery,
    ) -> Result<SearchPage, DocumentStoreError> {
        let filters = containment_filter(&query.filters);
        let order = match query.sort {
            Some((_, SortOrder::Asc)) => "ASC",
            _ => "DESC",
        };
        let sql = format!(
            "SELECT id, body, COUNT(*) OVER() AS total \
             FROM documents \
             WHERE engine = $1 AND collection = $2 AND body @> $3::jsonb \
             ORDER BY body #>> $4::text[] {order} \
             OFFSET $5 LIMIT $6",
        );
        let sort_path: Vec<String> = query
            .sort
            .as_ref()
            .map(|(field, _)| field.split('.').map(str::to_string).collect())
            .unwrap_or_else(|| vec!["id".to_string()]);
        let size = if query.size == 0 {
            i64::MAX
        } else {
            query.size as i64
        };
        let rows = sqlx::query(&sql)
            .bind(engine)
            .bind(collection)
            .bind(&filters)
            .bind(&sort_path)
            .bind(query.from as i64)
            .bind(size)
            .fetch_all(&self.pool)
            .await?;

        let total = rows
            .first()
            .map(|row| row.get::<i64, _>("total") as usize)
            .unwrap_or(0);
        let hits = rows
            .into_iter()
            .map(|row| Document::new(row.get::<String, _>("id"), row.get("body")))
            .collect();
        Ok(SearchPage {
            hits,
            total,
            from: query.from,
            size: query.size,
        })
    }

    async fn create(
        &self,
        engine: &str,
        collection: &str,
        doc: &Document,
    ) -> Result<(), DocumentStoreError> {
        let result = sqlx::query(
            "INSERT INTO documents (engine, collection, id, body) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (engine, collection, id) DO NOTHING",
        )
        .bind(engine)
        .bind(collection)
        .bind(&doc.id)
        .bind(&doc.body)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DocumentStoreError::AlreadyExists {
                collection: collection.to_string(),
                id: doc.id.clone(),
            });
        }
        Ok(())
    }

    async fn update(
        &self,
        engine: &str,
        collection: &str,
        doc: &Document,
    ) -> Result<(), DocumentStoreError> {
        let result = sqlx::query(
            "UPDATE documents SET body = $4 \
             WHERE engine = $1 AND collection = $2 AND id = $3",
        )
        .bind(engine)
        .bind(collection)
        .bind(&doc.id)
        .bind(&doc.body)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DocumentStoreError::NotFound {
                collection: collection.to_string(),
                id: doc.id.clone(),
            });
        }
        Ok(())
    }

    async fn delete(
        &self,
        engine: &str,
        collection: &str,
        id: &str,
    ) -> Result<(), DocumentStoreError> {
        let result = sqlx::query(
            "DELETE FROM documents WHERE engine = $1 AND collection = $2 AND id = $3",
        )
        .bind(engine)
        .bind(collection)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DocumentStoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn bulk_create(
        &self,
        engine: &str,
        collection: &str,
        docs: &[Document],
    ) -> Result<BulkOutcome, DocumentStoreError> {
        let mut outcome = BulkOutcome::default();
        for doc in docs {
            match self.create(engine, collection, doc).await {
                Ok(()) => outcome.successes += 1,
                Err(e) => outcome.errors.push(BulkItemError {
                    id: doc.id.clone(),
                    reason: e.to_string(),
                }),
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
        let mut outcome = BulkOutcome::default();
        for doc in docs {
            match self.update(engine, collection, doc).await {
                Ok(()) => outcome.successes += 1,
                Err(e) => outcome.errors.push(BulkItemError {
                    id: doc.id.clone(),
                    reason: e.to_string(),
                }),
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
        let mut result = HashMap::new();
        for twin in twin_ids {
            let rows: Vec<(String, serde_json::Value)> =
                sqlx::query_as(Self::ranked_query(twin.kind))
                    .bind(engine)
                    .bind(collection)
                    .bind(Self::twin_selector(twin)?)
                    .bind(count as i64)
                    .fetch_all(&self.pool)
                    .await?;
            if rows.is_empty() {
                continue;
            }
            let mut slots = Vec::with_capacity(rows.len());
            for (slot, body) in rows {
                slots.push((slot, serde_json::from_value(body)?));
            }
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
        let mut result = HashMap::new();
        for twin in twin_ids {
            let sql = match twin.kind {
                TwinKind::Device => {
                    "SELECT MAX((body->>'measured_at')::bigint) FROM documents \
                     WHERE engine = $1 AND collection = $2 \
                       AND body->'origin'->>'id' = $3"
                }
                TwinKind::Asset => {
                    "SELECT MAX((body->>'measured_at')::bigint) FROM documents \
                     WHERE engine = $1 AND collection = $2 \
                       AND body->'asset_context'->'asset_id' = $3::jsonb"
                }
            };
            let max: Option<i64> = sqlx::query_scalar(sql)
                .bind(engine)
                .bind(collection)
                .bind(Self::twin_selector(twin)?)
                .fetch_one(&self.pool)
                .await?;
            if let Some(measured_at) = max {
                result.insert(twin.clone(), measured_at);
            }
        }
        Ok(result)
    }
}
