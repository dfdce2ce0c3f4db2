mod conflict;
mod engine;
mod history;
mod id;
mod measure;
mod metadata;
mod model;
mod twin;

pub use conflict::{ConflictChunk, FieldConflict};
pub use engine::EngineDescriptor;
pub use history::{HistoryEvent, HistoryEventKind};
pub use id::{TwinId, TwinKind};
pub use measure::{
    AssetContext, MeasureOrigin, MeasureRecord, MeasureSource, MeasureTarget, Measurement,
};
pub use metadata::{FieldSchema, FieldType, GeoPoint, MetadataValue, ScalarType};
pub use model::{ModelDefinition, ModelKind, COMMONS_GROUP};
pub use twin::{DigitalTwin, EmbeddedMeasure, MeasureSlot, SlotMapping, TwinLink};
