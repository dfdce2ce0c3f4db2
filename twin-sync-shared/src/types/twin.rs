use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{MeasureOrigin, MetadataValue, TwinId};

/// A named, typed placeholder declared by a twin's model into which a
/// specific measurement type may be routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureSlot {
    pub name: String,
    pub measure_type: String,
}

/// Maps one device measure slot onto one asset measure slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMapping {
    pub device_slot: String,
    pub asset_slot: String,
}

/// One side of a device/asset relationship.
///
/// On a device the peer is the linked asset (at most one entry); on an
/// asset the peer is a linked device (many entries). Both sides carry the
/// same slot mapping so either document can answer routing questions on
/// its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwinLink {
    pub peer: TwinId,
    pub slot_map: Vec<SlotMapping>,
}

/// The most recent measurement denormalized onto a twin's current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedMeasure {
    pub measure_type: String,
    /// Epoch milliseconds at which the measurement was taken.
    pub measured_at: i64,
    pub values: BTreeMap<String, MetadataValue>,
    pub origin: MeasureOrigin,
}

/// The document representing a physical asset or device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalTwin {
    pub id: TwinId,
    pub engine_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
    #[serde(default)]
    pub measure_slots: Vec<MeasureSlot>,
    /// Slot name -> most recent measure, absent until first ingestion.
    #[serde(default)]
    pub measures: BTreeMap<String, EmbeddedMeasure>,
    #[serde(default)]
    pub links: Vec<TwinLink>,
}

impl DigitalTwin {
    pub fn new(id: TwinId, engine_id: impl Into<String>) -> Self {
        Self {
            id,
            engine_id: engine_id.into(),
            metadata: BTreeMap::new(),
            measure_slots: Vec::new(),
            measures: BTreeMap::new(),
            links: Vec::new(),
        }
    }

    /// Looks up a declared measure slot by name.
    pub fn slot(&self, name: &str) -> Option<&MeasureSlot> {
        self.measure_slots.iter().find(|s| s.name == name)
    }

    /// Returns the link to the given peer, if any.
    pub fn link_to(&self, peer: &TwinId) -> Option<&TwinLink> {
        self.links.iter().find(|l| &l.peer == peer)
    }

    /// Asset-side view: the set of asset slot names currently claimed by a
    /// linked device, excluding links to `except` when provided.
    pub fn claimed_asset_slots(&self, except: Option<&TwinId>) -> Vec<&str> {
        self.links
            .iter()
            .filter(|l| except != Some(&l.peer))
            .flat_map(|l| l.slot_map.iter().map(|m| m.asset_slot.as_str()))
            .collect()
    }

    /// Merges a measure into the current-state map, last write wins by
    /// measurement time rather than arrival order.
    ///
    /// The stored measure is replaced only if the incoming `measured_at` is
    /// strictly greater, or if the slot holds no measure yet. Returns
    /// whether the map changed, so redelivered or out-of-order messages
    /// leave the twin untouched.
    pub fn apply_measure(&mut self, slot_name: &str, measure: EmbeddedMeasure) -> bool {
        match self.measures.get(slot_name) {
            Some(current) if current.measured_at >= measure.measured_at => false,
            _ => {
                self.measures.insert(slot_name.to_string(), measure);
                true
            }
        }
    }
}
