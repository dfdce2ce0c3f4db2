//! Measure ingestion pipeline.
//!
//! Resolves each measurement's source and target, merges it into the
//! target twins' current state, persists it to the measure history, and
//! invokes the extension hooks around the write. Measurements whose name
//! maps to no slot exist only in history: they are stored with a null
//! asset context and never touch a twin document.
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, instrument, warn};
use twin_sync_repository::{Document, DocumentStore};
use twin_sync_shared::types::{
    AssetContext, DigitalTwin, EmbeddedMeasure, HistoryEvent, HistoryEventKind, MeasureRecord,
    MeasureSource, MeasureTarget, Measurement, TwinId, TwinKind,
};
use uuid::Uuid;

use crate::errors::IngestError;
use crate::history::HistoryAppender;
use crate::hooks::{HookRegistry, MeasureHookContext};
use crate::lock::LockRegistry;

pub const MEASURES_COLLECTION: &str = "measures";

/// What an ingestion call produced: the persisted records plus any
/// non-fatal after-hook warnings.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub records: Vec<MeasureRecord>,
    pub warnings: Vec<String>,
}

pub struct MeasureIngester {
    store: Arc<dyn DocumentStore>,
    locks: Arc<LockRegistry>,
    hooks: Arc<HookRegistry>,
    history: Arc<HistoryAppender>,
    lock_timeout: Duration,
}

impl MeasureIngester {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        locks: Arc<LockRegistry>,
        hooks: Arc<HookRegistry>,
        history: Arc<HistoryAppender>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            store,
            locks,
            hooks,
            history,
            lock_timeout,
        }
    }

    async fn read_twin(
        &self,
        engine: &str,
        id: &TwinId,
    ) -> Result<Option<DigitalTwin>, IngestError> {
        let doc = self
            .store
            .get(engine, id.kind.collection(), &id.document_id())
            .await?;
        match doc {
            Some(doc) => Ok(Some(serde_json::from_value(doc.body)?)),
            None => Ok(None),
        }
    }

    /// Ingests a batch of measurements.
    ///
    /// Before-hooks run ahead of any write and may rewrite the batch;
    /// their failure aborts the pipeline. The records are then persisted
    /// in a single bulk insert, merged into the routed twins' current
    /// state under each twin's lock, and finally handed to after-hooks,
    /// whose failure is surfaced as a warning since the write already
    /// committed.
    ///
    /// # Arguments
    ///
    /// * `source` - Where the batch came from (device or external API).
    /// * `target` - Where it should be routed.
    /// * `measurements` - The decoded measurements to ingest.
    /// * `causality_ids` - Ids of the raw payloads the batch was decoded
    ///   from, stamped onto every persisted record.
    ///
    /// # Returns
    ///
    /// A `Result` holding the [`IngestOutcome`] with the persisted records
    /// and any non-fatal after-hook warnings, or an `IngestError` if the
    /// pipeline aborted before the write.
    #[instrument(skip(self, source, target, measurements, causality_ids))]
    pub async fn ingest(
        &self,
        source: MeasureSource,
        target: MeasureTarget,
        measurements: Vec<Measurement>,
        causality_ids: Vec<String>,
    ) -> Result<IngestOutcome, IngestError> {
        let engine = target.engine_id().to_string();

        let device = match source.device_twin_id() {
            Some(id) => Some(
                self.read_twin(&engine, &id)
                    .await?
                    .ok_or_else(|| IngestError::TwinNotFound(id.clone()))?,
            ),
            None => None,
        };

        let routed_asset_id = match &target {
            MeasureTarget::Api { asset_id, .. } => Some(asset_id.clone()),
            MeasureTarget::Device {
                asset_id: Some(id), ..
            } => Some(id.clone()),
            MeasureTarget::Device { asset_id: None, .. } => device
                .as_ref()
                .and_then(|d| d.links.first().map(|l| l.peer.clone())),
        };
        let asset = match &routed_asset_id {
            Some(id) => {
                if id.kind != TwinKind::Asset {
                    return Err(IngestError::TargetNotAsset(id.clone()));
                }
                Some(
                    self.read_twin(&engine, id)
                        .await?
                        .ok_or_else(|| IngestError::TwinNotFound(id.clone()))?,
                )
            }
            None => None,
        };

        let mut ctx = MeasureHookContext {
            source: source.clone(),
            target: target.clone(),
            asset: asset.clone(),
            measurements,
        };
        for hook in self.hooks.measure_hooks(&engine) {
            hook.process_before(&mut ctx).await?;
        }

        let records: Vec<MeasureRecord> = ctx
            .measurements
            .iter()
            .map(|m| MeasureRecord {
                id: Uuid::new_v4(),
                measure_type: m.measure_type.clone(),
                measured_at: m.measured_at,
                values: m.values.clone(),
                origin: source.origin(&m.name),
                asset_context: resolve_asset_context(&source, device.as_ref(), asset.as_ref(), m),
                causality_ids: causality_ids.clone(),
            })
            .collect();

        let mut docs = Vec::with_capacity(records.len());
        for record in &records {
            docs.push(Document::new(
                record.id.to_string(),
                serde_json::to_value(record)?,
            ));
        }
        let outcome = self
            .store
            .bulk_create(&engine, MEASURES_COLLECTION, &docs)
            .await?;
        if let Some(first) = outcome.first_error() {
            return Err(IngestError::PartialPersistence {
                failures: outcome.errors.len(),
                total: docs.len(),
                first_reason: first.reason.clone(),
            });
        }

        if let Some(snapshot) = &device {
            self.merge_into_device(&engine, snapshot, &source, &records)
                .await?;
        }
        if let Some(snapshot) = &asset {
            self.merge_into_asset(&engine, snapshot, &records).await?;
        }

        let mut warnings = Vec::new();
        for hook in self.hooks.measure_hooks(&engine) {
            if let Err(e) = hook.process_after(&ctx, &records).await {
                warn!(engine = %engine, error = %e, "measure after-hook failed");
                warnings.push(e.to_string());
            }
        }

        info!(engine = %engine, count = records.len(), "measurements ingested");
        Ok(IngestOutcome { records, warnings })
    }

    /// Merges records into the device's current state and enriches its
    /// metadata from the source payload, under the device's lock.
    async fn merge_into_device(
        &self,
        engine: &str,
        snapshot: &DigitalTwin,
        source: &MeasureSource,
        records: &[MeasureRecord],
    ) -> Result<(), IngestError> {
        let _guard = self
            .locks
            .acquire(&snapshot.id.lock_key(), self.lock_timeout)
            .await?;
        // Re-read under the lock; the pre-lock snapshot only routed the batch.
        let Some(mut twin) = self.read_twin(engine, &snapshot.id).await? else {
            return Ok(());
        };

        let mut changed = false;
        let mut arrived = Vec::new();
        for record in records {
            let name = record.origin.measure_name().to_string();
            let Some(slot) = twin.slot(&name) else {
                continue;
            };
            if slot.measure_type != record.measure_type {
                continue;
            }
            changed |= twin.apply_measure(&name, embedded_from(record));
            arrived.push(name);
        }

        let mut metadata_changed = false;
        if let MeasureSource::Device { metadata, .. } = source {
            for (field, value) in metadata {
                if twin.metadata.get(field) != Some(value) {
                    twin.metadata.insert(field.clone(), value.clone());
                    changed = true;
                    metadata_changed = true;
                }
            }
        }

        if changed {
            let doc = Document::new(twin.id.document_id(), serde_json::to_value(&twin)?);
            self.store
                .update(engine, twin.id.kind.collection(), &doc)
                .await?;
        }

        let mut events = Vec::new();
        if !arrived.is_empty() {
            events.push(HistoryEvent::now(
                twin.id.clone(),
                HistoryEventKind::Measure,
                json!({"measures": arrived}),
            ));
        }
        if metadata_changed {
            events.push(HistoryEvent::now(
                twin.id.clone(),
                HistoryEventKind::Metadata,
                json!({"metadata": twin.metadata}),
            ));
        }
        self.history.add(engine, &events).await?;
        Ok(())
    }

    /// Merges records routed to an asset slot into the asset's current
    /// state, under the asset's lock.
    async fn merge_into_asset(
        &self,
        engine: &str,
        snapshot: &DigitalTwin,
        records: &[MeasureRecord],
    ) -> Result<(), IngestError> {
        let routed: Vec<&MeasureRecord> = records
            .iter()
            .filter(|r| {
                r.asset_context
                    .as_ref()
                    .is_some_and(|ctx| ctx.asset_id == snapshot.id)
            })
            .collect();
        if routed.is_empty() {
            return Ok(());
        }

        let _guard = self
            .locks
            .acquire(&snapshot.id.lock_key(), self.lock_timeout)
            .await?;
        let Some(mut twin) = self.read_twin(engine, &snapshot.id).await? else {
            return Ok(());
        };

        let mut changed = false;
        let mut arrived = Vec::new();
        for record in &routed {
            let ctx = record.asset_context.as_ref().unwrap();
            changed |= twin.apply_measure(&ctx.asset_slot, embedded_from(record));
            arrived.push(ctx.asset_slot.clone());
        }

        if changed {
            let doc = Document::new(twin.id.document_id(), serde_json::to_value(&twin)?);
            self.store
                .update(engine, twin.id.kind.collection(), &doc)
                .await?;
        }
        self.history
            .add(
                engine,
                &[HistoryEvent::now(
                    twin.id.clone(),
                    HistoryEventKind::Measure,
                    json!({"measures": arrived}),
                )],
            )
            .await?;
        Ok(())
    }
}

fn embedded_from(record: &MeasureRecord) -> EmbeddedMeasure {
    EmbeddedMeasure {
        measure_type: record.measure_type.clone(),
        measured_at: record.measured_at,
        values: record.values.clone(),
        origin: record.origin.clone(),
    }
}

/// Decides which asset slot (if any) a measurement routes to.
///
/// Routing through a device follows the device's link mapping for the
/// measurement name; routing through the API target matches the asset's
/// declared slots directly by name. A measurement that maps to no slot
/// yields `None` and exists only in history.
fn resolve_asset_context(
    source: &MeasureSource,
    device: Option<&DigitalTwin>,
    asset: Option<&DigitalTwin>,
    measurement: &Measurement,
) -> Option<AssetContext> {
    let asset = asset?;
    match source {
        MeasureSource::Device { .. } => {
            let device = device?;
            let link = device.link_to(&asset.id)?;
            let mapping = link
                .slot_map
                .iter()
                .find(|m| m.device_slot == measurement.name)?;
            Some(AssetContext {
                asset_id: asset.id.clone(),
                asset_slot: mapping.asset_slot.clone(),
                metadata: asset.metadata.clone(),
            })
        }
        MeasureSource::Api { .. } => {
            let slot = asset.slot(&measurement.name)?;
            if slot.measure_type != measurement.measure_type {
                return None;
            }
            Some(AssetContext {
                asset_id: asset.id.clone(),
                asset_slot: slot.name.clone(),
                metadata: asset.metadata.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HookError;
    use crate::hooks::MeasureHook;
    use std::collections::BTreeMap;
    use twin_sync_repository::{MemoryDocumentStore, SearchQuery};
    use twin_sync_shared::types::{MeasureSlot, MetadataValue, SlotMapping, TwinLink};

    struct Fixture {
        store: Arc<dyn DocumentStore>,
        hooks: Arc<HookRegistry>,
        ingester: MeasureIngester,
    }

    impl Fixture {
        fn new() -> Self {
            let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
            let locks = Arc::new(LockRegistry::new());
            let hooks = Arc::new(HookRegistry::new());
            let history = Arc::new(HistoryAppender::new(store.clone()));
            let ingester = MeasureIngester::new(
                store.clone(),
                locks,
                hooks.clone(),
                history,
                Duration::from_secs(1),
            );
            Self {
                store,
                hooks,
                ingester,
            }
        }

        /// Seeds a linked device/asset pair: device slot `temperature`
        /// mapped onto asset slot `temperatureExt`.
        async fn seed_linked_pair(&self) -> (TwinId, TwinId) {
            let device_id = TwinId::new(TwinKind::Device, "AirSensor", "u1");
            let asset_id = TwinId::new(TwinKind::Asset, "Room", "kitchen");
            let slot_map = vec![SlotMapping {
                device_slot: "temperature".to_string(),
                asset_slot: "temperatureExt".to_string(),
            }];

            let device = DigitalTwin {
                measure_slots: vec![MeasureSlot {
                    name: "temperature".to_string(),
                    measure_type: "temperature".to_string(),
                }],
                links: vec![TwinLink {
                    peer: asset_id.clone(),
                    slot_map: slot_map.clone(),
                }],
                ..DigitalTwin::new(device_id.clone(), "engine-a")
            };
            let asset = DigitalTwin {
                measure_slots: vec![MeasureSlot {
                    name: "temperatureExt".to_string(),
                    measure_type: "temperature".to_string(),
                }],
                links: vec![TwinLink {
                    peer: device_id.clone(),
                    slot_map,
                }],
                ..DigitalTwin::new(asset_id.clone(), "engine-a")
            };
            for twin in [&device, &asset] {
                let doc = Document::new(
                    twin.id.document_id(),
                    serde_json::to_value(twin).unwrap(),
                );
                self.store
                    .create("engine-a", twin.id.kind.collection(), &doc)
                    .await
                    .unwrap();
            }
            (device_id, asset_id)
        }

        async fn twin(&self, id: &TwinId) -> DigitalTwin {
            let doc = self
                .store
                .get("engine-a", id.kind.collection(), &id.document_id())
                .await
                .unwrap()
                .unwrap();
            serde_json::from_value(doc.body).unwrap()
        }

        async fn stored_measure_count(&self) -> usize {
            self.store
                .search("engine-a", MEASURES_COLLECTION, &SearchQuery::default())
                .await
                .unwrap()
                .total
        }
    }

    fn device_source() -> MeasureSource {
        MeasureSource::Device {
            id: "AirSensor-u1".to_string(),
            model: "AirSensor".to_string(),
            reference: "u1".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    fn device_target() -> MeasureTarget {
        MeasureTarget::Device {
            engine_id: "engine-a".to_string(),
            asset_id: None,
        }
    }

    fn temperature(measured_at: i64, value: f64) -> Measurement {
        Measurement {
            name: "temperature".to_string(),
            measure_type: "temperature".to_string(),
            measured_at,
            values: [(
                "temperature".to_string(),
                MetadataValue::Number(value),
            )]
            .into_iter()
            .collect(),
        }
    }

    #[tokio::test]
    async fn test_later_measure_wins_regardless_of_arrival_order() {
        let f = Fixture::new();
        let (device_id, _) = f.seed_linked_pair().await;

        f.ingester
            .ingest(
                device_source(),
                device_target(),
                vec![temperature(100, 20.0)],
                vec![],
            )
            .await
            .unwrap();
        f.ingester
            .ingest(
                device_source(),
                device_target(),
                vec![temperature(50, 99.0)],
                vec![],
            )
            .await
            .unwrap();

        let device = f.twin(&device_id).await;
        assert_eq!(
            device.measures["temperature"].values["temperature"],
            MetadataValue::Number(20.0)
        );
        // Both arrivals are in history even though only one won the merge.
        assert_eq!(f.stored_measure_count().await, 2);
    }

    #[tokio::test]
    async fn test_linked_measure_propagates_to_asset_slot() {
        let f = Fixture::new();
        let (_, asset_id) = f.seed_linked_pair().await;

        let outcome = f
            .ingester
            .ingest(
                device_source(),
                device_target(),
                vec![temperature(100, 21.5)],
                vec!["payload-1".to_string()],
            )
            .await
            .unwrap();

        let record = &outcome.records[0];
        let ctx = record.asset_context.as_ref().unwrap();
        assert_eq!(ctx.asset_id, asset_id);
        assert_eq!(ctx.asset_slot, "temperatureExt");
        assert_eq!(record.causality_ids, vec!["payload-1".to_string()]);

        let asset = f.twin(&asset_id).await;
        assert_eq!(
            asset.measures["temperatureExt"].values["temperature"],
            MetadataValue::Number(21.5)
        );
    }

    #[tokio::test]
    async fn test_unmapped_measure_exists_only_in_history() {
        let f = Fixture::new();
        let (device_id, asset_id) = f.seed_linked_pair().await;

        let outcome = f
            .ingester
            .ingest(
                device_source(),
                device_target(),
                vec![Measurement {
                    name: "vibration".to_string(),
                    measure_type: "vibration".to_string(),
                    measured_at: 100,
                    values: BTreeMap::new(),
                }],
                vec![],
            )
            .await
            .unwrap();

        assert!(outcome.records[0].asset_context.is_none());
        assert_eq!(f.stored_measure_count().await, 1);
        assert!(f.twin(&device_id).await.measures.is_empty());
        assert!(f.twin(&asset_id).await.measures.is_empty());
    }

    #[tokio::test]
    async fn test_device_metadata_enrichment() {
        let f = Fixture::new();
        let (device_id, _) = f.seed_linked_pair().await;

        f.ingester
            .ingest(
                MeasureSource::Device {
                    id: "AirSensor-u1".to_string(),
                    model: "AirSensor".to_string(),
                    reference: "u1".to_string(),
                    metadata: [(
                        "battery".to_string(),
                        MetadataValue::Number(87.0),
                    )]
                    .into_iter()
                    .collect(),
                },
                device_target(),
                vec![temperature(100, 20.0)],
                vec![],
            )
            .await
            .unwrap();

        let device = f.twin(&device_id).await;
        assert_eq!(device.metadata["battery"], MetadataValue::Number(87.0));
    }

    #[tokio::test]
    async fn test_api_target_routes_by_asset_slot_name() {
        let f = Fixture::new();
        let (_, asset_id) = f.seed_linked_pair().await;

        f.ingester
            .ingest(
                MeasureSource::Api {
                    id: "rest-client".to_string(),
                    metadata: BTreeMap::new(),
                },
                MeasureTarget::Api {
                    engine_id: "engine-a".to_string(),
                    asset_id: asset_id.clone(),
                    engine_group: None,
                },
                vec![Measurement {
                    name: "temperatureExt".to_string(),
                    measure_type: "temperature".to_string(),
                    measured_at: 200,
                    values: [(
                        "temperature".to_string(),
                        MetadataValue::Number(18.0),
                    )]
                    .into_iter()
                    .collect(),
                }],
                vec![],
            )
            .await
            .unwrap();

        let asset = f.twin(&asset_id).await;
        assert_eq!(
            asset.measures["temperatureExt"].values["temperature"],
            MetadataValue::Number(18.0)
        );
    }

    struct RejectingHook;

    #[async_trait::async_trait]
    impl MeasureHook for RejectingHook {
        fn name(&self) -> &str {
            "rejecting"
        }

        async fn process_before(&self, _ctx: &mut MeasureHookContext) -> Result<(), HookError> {
            Err(HookError::new("rejecting", "batch refused"))
        }
    }

    struct FailingAfterHook;

    #[async_trait::async_trait]
    impl MeasureHook for FailingAfterHook {
        fn name(&self) -> &str {
            "failing-after"
        }

        async fn process_after(
            &self,
            _ctx: &MeasureHookContext,
            _records: &[MeasureRecord],
        ) -> Result<(), HookError> {
            Err(HookError::new("failing-after", "side effect failed"))
        }
    }

    #[tokio::test]
    async fn test_before_hook_failure_aborts_before_any_write() {
        let f = Fixture::new();
        f.seed_linked_pair().await;
        f.hooks.register_measure_hook(Arc::new(RejectingHook));

        let err = f
            .ingester
            .ingest(
                device_source(),
                device_target(),
                vec![temperature(100, 20.0)],
                vec![],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::HookRejected(_)));
        assert_eq!(f.stored_measure_count().await, 0);
    }

    #[tokio::test]
    async fn test_after_hook_failure_is_a_warning_not_a_rollback() {
        let f = Fixture::new();
        f.seed_linked_pair().await;
        f.hooks.register_measure_hook(Arc::new(FailingAfterHook));

        let outcome = f
            .ingester
            .ingest(
                device_source(),
                device_target(),
                vec![temperature(100, 20.0)],
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(f.stored_measure_count().await, 1);
    }
}
