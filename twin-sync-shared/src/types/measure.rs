use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{MetadataValue, TwinId, TwinKind};

/// A decoded measurement handed to the ingestion pipeline.
///
/// `name` is the measure-slot name the producer reports under; whether it
/// routes anywhere is decided against the target twin's declared slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    pub measure_type: String,
    /// Epoch milliseconds.
    pub measured_at: i64,
    pub values: BTreeMap<String, MetadataValue>,
}

/// Where a measurement came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MeasureOrigin {
    Device {
        id: String,
        model: String,
        reference: String,
        measure_name: String,
    },
    Api {
        id: String,
        measure_name: String,
    },
    Computed {
        rule_id: String,
        measure_name: String,
    },
}

impl MeasureOrigin {
    /// The producer-side measure name this origin reported under.
    pub fn measure_name(&self) -> &str {
        match self {
            MeasureOrigin::Device { measure_name, .. } => measure_name,
            MeasureOrigin::Api { measure_name, .. } => measure_name,
            MeasureOrigin::Computed { measure_name, .. } => measure_name,
        }
    }

    /// Document id of the originating twin, when the origin is a device.
    pub fn device_document_id(&self) -> Option<&str> {
        match self {
            MeasureOrigin::Device { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Identifies where a batch of measurements came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MeasureSource {
    Device {
        /// Document id of the originating device twin.
        id: String,
        model: String,
        reference: String,
        /// Device state reported alongside the measurements, merged into
        /// the device twin's metadata on ingestion.
        #[serde(default)]
        metadata: BTreeMap<String, MetadataValue>,
    },
    Api {
        id: String,
        #[serde(default)]
        metadata: BTreeMap<String, MetadataValue>,
    },
}

impl MeasureSource {
    /// Builds the origin descriptor recorded on each measure.
    pub fn origin(&self, measure_name: &str) -> MeasureOrigin {
        match self {
            MeasureSource::Device {
                id,
                model,
                reference,
                ..
            } => MeasureOrigin::Device {
                id: id.clone(),
                model: model.clone(),
                reference: reference.clone(),
                measure_name: measure_name.to_string(),
            },
            MeasureSource::Api { id, .. } => MeasureOrigin::Api {
                id: id.clone(),
                measure_name: measure_name.to_string(),
            },
        }
    }

    /// Twin id of the originating device, when the source is a device.
    pub fn device_twin_id(&self) -> Option<TwinId> {
        match self {
            MeasureSource::Device {
                model, reference, ..
            } => Some(TwinId::new(TwinKind::Device, model.clone(), reference.clone())),
            MeasureSource::Api { .. } => None,
        }
    }
}

/// Identifies where a batch of measurements should be routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MeasureTarget {
    /// Route through a device twin; the asset is resolved from the
    /// device's link unless overridden.
    Device {
        engine_id: String,
        asset_id: Option<TwinId>,
    },
    /// Push directly onto an asset twin.
    Api {
        engine_id: String,
        asset_id: TwinId,
        engine_group: Option<String>,
    },
}

impl MeasureTarget {
    pub fn engine_id(&self) -> &str {
        match self {
            MeasureTarget::Device { engine_id, .. } => engine_id,
            MeasureTarget::Api { engine_id, .. } => engine_id,
        }
    }
}

/// Snapshot of the asset a measurement was routed to at ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetContext {
    pub asset_id: TwinId,
    pub asset_slot: String,
    pub metadata: BTreeMap<String, MetadataValue>,
}

/// An immutable, append-only measurement record.
///
/// Forms the source of truth that a twin's `measures` map denormalizes.
/// Never updated or deleted by normal operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureRecord {
    pub id: Uuid,
    pub measure_type: String,
    pub measured_at: i64,
    pub values: BTreeMap<String, MetadataValue>,
    pub origin: MeasureOrigin,
    /// `None` when the measurement is not routed to any asset slot.
    pub asset_context: Option<AssetContext>,
    /// Ids of the raw payloads this record was decoded from.
    #[serde(default)]
    pub causality_ids: Vec<String>,
}

impl MeasureRecord {
    /// Whether this record belongs to the given twin, either as its
    /// originating device or as the asset it was routed to.
    pub fn belongs_to(&self, twin: &TwinId) -> bool {
        match twin.kind {
            TwinKind::Device => self.origin.device_document_id() == Some(&twin.document_id()[..]),
            TwinKind::Asset => self
                .asset_context
                .as_ref()
                .is_some_and(|ctx| ctx.asset_id == *twin),
        }
    }

    /// Slot name under which this record is grouped for the given twin.
    pub fn slot_for(&self, twin: &TwinId) -> Option<&str> {
        match twin.kind {
            TwinKind::Device => Some(self.origin.measure_name()),
            TwinKind::Asset => self
                .asset_context
                .as_ref()
                .filter(|ctx| ctx.asset_id == *twin)
                .map(|ctx| ctx.asset_slot.as_str()),
        }
    }
}
