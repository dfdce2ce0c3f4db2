//! End-to-end scenarios running the full engine over the in-memory store.
//!
//! Covers the full lifecycle (models, twins, links, ingestion, queries,
//! deletion) plus the concurrency guarantees: slot uniqueness under racing
//! link calls, no lost metadata updates on one twin, and append-only
//! measure history.

use std::collections::BTreeMap;
use std::sync::Arc;

use twin_sync_pipeline::errors::{LinkError, QueryError};
use twin_sync_pipeline::link::{LinkRequest, UnlinkRequest};
use twin_sync_pipeline::{EngineConfig, SyncEngine};
use twin_sync_repository::SearchQuery;
use twin_sync_shared::types::{
    EngineDescriptor, FieldType, MeasureSlot, MeasureSource, MeasureTarget, Measurement,
    MetadataValue, ModelDefinition, ModelKind, ScalarType, SlotMapping, TwinId, TwinKind,
    COMMONS_GROUP,
};

const ENGINE: &str = "engine-a";

async fn bootstrap() -> SyncEngine {
    let engine = SyncEngine::new(EngineConfig::default()).await.unwrap();
    engine
        .engines
        .create(&EngineDescriptor {
            id: ENGINE.to_string(),
            group: "buildings".to_string(),
        })
        .await
        .unwrap();

    for name in ["temperature", "humidity"] {
        engine
            .models
            .register_model(&ModelDefinition {
                kind: ModelKind::Measure,
                name: name.to_string(),
                engine_group: COMMONS_GROUP.to_string(),
                metadata_schema: BTreeMap::new(),
                measure_slots: Vec::new(),
            })
            .await
            .unwrap();
    }
    engine
        .models
        .register_model(&ModelDefinition {
            kind: ModelKind::Device,
            name: "AirSensor".to_string(),
            engine_group: COMMONS_GROUP.to_string(),
            metadata_schema: [(
                "battery".to_string(),
                FieldType::Scalar(ScalarType::Number),
            )]
            .into_iter()
            .collect(),
            measure_slots: vec![MeasureSlot {
                name: "temperature".to_string(),
                measure_type: "temperature".to_string(),
            }],
        })
        .await
        .unwrap();
    engine
        .models
        .register_model(&ModelDefinition {
            kind: ModelKind::Asset,
            name: "Room".to_string(),
            engine_group: COMMONS_GROUP.to_string(),
            metadata_schema: [(
                "floor".to_string(),
                FieldType::Scalar(ScalarType::Integer),
            )]
            .into_iter()
            .collect(),
            measure_slots: vec![MeasureSlot {
                name: "temperatureExt".to_string(),
                measure_type: "temperature".to_string(),
            }],
        })
        .await
        .unwrap();
    engine
}

fn device_id(reference: &str) -> TwinId {
    TwinId::new(TwinKind::Device, "AirSensor", reference)
}

fn room_id(reference: &str) -> TwinId {
    TwinId::new(TwinKind::Asset, "Room", reference)
}

async fn provision_pair(engine: &SyncEngine, device_ref: &str, room_ref: &str) -> (TwinId, TwinId) {
    let device = engine
        .twins
        .create_twin(ENGINE, device_id(device_ref), BTreeMap::new())
        .await
        .unwrap();
    let room = engine
        .twins
        .create_twin(ENGINE, room_id(room_ref), BTreeMap::new())
        .await
        .unwrap();
    (device.id, room.id)
}

fn explicit_link(asset: &TwinId) -> LinkRequest {
    LinkRequest {
        asset_id: asset.clone(),
        measure_slots: vec![SlotMapping {
            device_slot: "temperature".to_string(),
            asset_slot: "temperatureExt".to_string(),
        }],
        implicit_measures_linking: false,
    }
}

fn device_source(reference: &str) -> MeasureSource {
    MeasureSource::Device {
        id: format!("AirSensor-{reference}"),
        model: "AirSensor".to_string(),
        reference: reference.to_string(),
        metadata: BTreeMap::new(),
    }
}

fn device_target() -> MeasureTarget {
    MeasureTarget::Device {
        engine_id: ENGINE.to_string(),
        asset_id: None,
    }
}

fn temperature(measured_at: i64, value: f64) -> Measurement {
    Measurement {
        name: "temperature".to_string(),
        measure_type: "temperature".to_string(),
        measured_at,
        values: [("temperature".to_string(), MetadataValue::Number(value))]
            .into_iter()
            .collect(),
    }
}

#[tokio::test]
async fn test_full_lifecycle() {
    let engine = bootstrap().await;
    let (device, room) = provision_pair(&engine, "u1", "kitchen").await;

    engine
        .links
        .link_assets(ENGINE, &device, &[explicit_link(&room)])
        .await
        .unwrap();

    // Out-of-order delivery: the later measurement wins either way.
    engine
        .ingest
        .ingest(
            device_source("u1"),
            device_target(),
            vec![temperature(100, 20.0)],
            vec![],
        )
        .await
        .unwrap();
    engine
        .ingest
        .ingest(
            device_source("u1"),
            device_target(),
            vec![temperature(50, 99.0)],
            vec![],
        )
        .await
        .unwrap();

    let stored = engine.twins.get_twin(ENGINE, &device).await.unwrap();
    assert_eq!(
        stored.measures["temperature"].values["temperature"],
        MetadataValue::Number(20.0)
    );
    let stored = engine.twins.get_twin(ENGINE, &room).await.unwrap();
    assert_eq!(
        stored.measures["temperatureExt"].values["temperature"],
        MetadataValue::Number(20.0)
    );

    // The query service aggregates over history, not the twin documents.
    let slots = engine
        .query
        .get_last_measures(ENGINE, &device, 10)
        .await
        .unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].1.measured_at, 100);
    assert_eq!(
        engine
            .query
            .get_last_measured_at(ENGINE, &room)
            .await
            .unwrap(),
        100
    );

    // Deleting the device cascades the unlink onto the room.
    engine.twins.delete_twin(ENGINE, &device).await.unwrap();
    let stored = engine.twins.get_twin(ENGINE, &room).await.unwrap();
    assert!(stored.links.is_empty());
}

#[tokio::test]
async fn test_second_device_cannot_claim_taken_slot() {
    let engine = bootstrap().await;
    let (d1, room) = provision_pair(&engine, "u1", "kitchen").await;
    let d2 = engine
        .twins
        .create_twin(ENGINE, device_id("u2"), BTreeMap::new())
        .await
        .unwrap()
        .id;

    engine
        .links
        .link_assets(ENGINE, &d1, &[explicit_link(&room)])
        .await
        .unwrap();
    let err = engine
        .links
        .link_assets(ENGINE, &d2, &[explicit_link(&room)])
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::SlotClaimed { .. }));
}

#[tokio::test]
async fn test_concurrent_links_preserve_slot_uniqueness() {
    let engine = Arc::new(bootstrap().await);
    let (_, room) = provision_pair(&engine, "u0", "kitchen").await;

    let mut handles = Vec::new();
    for i in 0..6 {
        let reference = format!("racer-{i}");
        engine
            .twins
            .create_twin(ENGINE, device_id(&reference), BTreeMap::new())
            .await
            .unwrap();
        let engine = Arc::clone(&engine);
        let room = room.clone();
        handles.push(tokio::spawn(async move {
            engine
                .links
                .link_assets(ENGINE, &device_id(&reference), &[explicit_link(&room)])
                .await
                .is_ok()
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);

    let stored = engine.twins.get_twin(ENGINE, &room).await.unwrap();
    assert_eq!(stored.links.len(), 1);
}

#[tokio::test]
async fn test_concurrent_metadata_updates_are_not_lost() {
    let engine = Arc::new(bootstrap().await);

    // A model with one field per concurrent writer.
    let schema: BTreeMap<String, FieldType> = (0..8)
        .map(|i| (format!("zone_{i}"), FieldType::Scalar(ScalarType::Keyword)))
        .collect();
    engine
        .models
        .register_model(&ModelDefinition {
            kind: ModelKind::Asset,
            name: "Floorplan".to_string(),
            engine_group: COMMONS_GROUP.to_string(),
            metadata_schema: schema,
            measure_slots: Vec::new(),
        })
        .await
        .unwrap();
    let id = TwinId::new(TwinKind::Asset, "Floorplan", "hq");
    engine
        .twins
        .create_twin(ENGINE, id.clone(), BTreeMap::new())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = Arc::clone(&engine);
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .twins
                .update_metadata(
                    ENGINE,
                    &id,
                    [(
                        format!("zone_{i}"),
                        MetadataValue::Text(format!("wing-{i}")),
                    )]
                    .into_iter()
                    .collect(),
                )
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Every writer's field survived: no read-modify-write was lost.
    let stored = engine.twins.get_twin(ENGINE, &id).await.unwrap();
    assert_eq!(stored.metadata.len(), 8);
}

#[tokio::test]
async fn test_history_only_grows() {
    let engine = bootstrap().await;
    let (device, room) = provision_pair(&engine, "u1", "kitchen").await;
    let store = engine.store();

    let count = |collection: &'static str| {
        let store = store.clone();
        async move {
            store
                .search(ENGINE, collection, &SearchQuery::default())
                .await
                .unwrap()
                .total
        }
    };

    let mut last_history = count("history").await;
    let mut last_measures = count("measures").await;

    engine
        .links
        .link_assets(ENGINE, &device, &[explicit_link(&room)])
        .await
        .unwrap();
    for step in 0..3 {
        engine
            .ingest
            .ingest(
                device_source("u1"),
                device_target(),
                vec![temperature(100 + step, 20.0)],
                vec![],
            )
            .await
            .unwrap();
        let history = count("history").await;
        let measures = count("measures").await;
        assert!(history >= last_history);
        assert!(measures > last_measures);
        last_history = history;
        last_measures = measures;
    }

    engine
        .links
        .unlink_assets(
            ENGINE,
            &device,
            &[UnlinkRequest {
                asset_id: room.clone(),
                all_measures: true,
                measure_slots: Vec::new(),
            }],
        )
        .await
        .unwrap();
    assert!(count("history").await >= last_history);
}

#[tokio::test]
async fn test_query_errors_and_omissions() {
    let engine = bootstrap().await;
    let (device, _) = provision_pair(&engine, "u1", "kitchen").await;

    // Twin exists but never measured anything.
    let err = engine
        .query
        .get_last_measures(ENGINE, &device, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::NoMeasures(_)));

    engine
        .ingest
        .ingest(
            device_source("u1"),
            device_target(),
            vec![temperature(100, 20.0)],
            vec![],
        )
        .await
        .unwrap();

    let silent = device_id("silent");
    let result = engine
        .query
        .m_get_last_measures(ENGINE, &[device.clone(), silent.clone()], 10)
        .await
        .unwrap();
    assert!(result.contains_key(&device));
    assert!(!result.contains_key(&silent));
}
