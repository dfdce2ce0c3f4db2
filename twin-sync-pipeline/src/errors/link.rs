//! Error types for the digital twin link manager.
use thiserror::Error;
use twin_sync_repository::DocumentStoreError;
use twin_sync_shared::types::TwinId;

use crate::errors::{HistoryError, LockError};

/// Represents errors that can occur while linking or unlinking twins.
///
/// Every validation variant is raised before any write is committed, so a
/// failed call leaves both documents untouched.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Document store error: {0}")]
    Store(#[from] DocumentStoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Twin {0} not found")]
    TwinNotFound(TwinId),

    #[error("Twin {0} is not a {1}")]
    WrongKind(TwinId, &'static str),

    #[error("Device {device} (engine \"{device_engine}\") and asset {asset} (engine \"{asset_engine}\") belong to different engines")]
    CrossEngine {
        device: TwinId,
        device_engine: String,
        asset: TwinId,
        asset_engine: String,
    },

    #[error("Device {device} is already linked to asset {asset}")]
    AlreadyLinkedElsewhere { device: TwinId, asset: TwinId },

    #[error("Measure slot \"{slot}\" does not exist on device {device}")]
    UnknownDeviceSlot { device: TwinId, slot: String },

    #[error("Measure slot \"{slot}\" does not exist on asset {asset}")]
    UnknownAssetSlot { asset: TwinId, slot: String },

    #[error("Device slot \"{device_slot}\" ({device_type}) and asset slot \"{asset_slot}\" ({asset_type}) hold different measure types")]
    SlotTypeMismatch {
        device_slot: String,
        device_type: String,
        asset_slot: String,
        asset_type: String,
    },

    /// A slot accepts exactly one producer at a time.
    #[error("Asset slot \"{slot}\" on {asset} is already claimed by device {claimed_by}")]
    SlotClaimed {
        asset: TwinId,
        slot: String,
        claimed_by: TwinId,
    },

    /// A link with zero measure mappings is not permitted.
    #[error("Link request for device {device} would carry no measure mapping")]
    EmptyMapping { device: TwinId },

    #[error("Device {device} is not linked to asset {asset}")]
    NotLinked { device: TwinId, asset: TwinId },

    #[error("Device slot \"{slot}\" is not mapped on the link between {device} and {asset}")]
    UnknownMapping {
        device: TwinId,
        asset: TwinId,
        slot: String,
    },
}
