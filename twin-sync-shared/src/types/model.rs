use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{FieldSchema, MeasureSlot};

/// Group namespace whose models apply to every engine group.
pub const COMMONS_GROUP: &str = "commons";

/// The kinds of schema definitions the model registry stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Asset,
    Device,
    Measure,
    Group,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Asset => write!(f, "asset"),
            ModelKind::Device => write!(f, "device"),
            ModelKind::Measure => write!(f, "measure"),
            ModelKind::Group => write!(f, "group"),
        }
    }
}

/// A versioned schema definition for one model name.
///
/// Asset and device models additionally declare the measure slots their
/// twins expose; measure models declare the value schema of one
/// measurement type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub kind: ModelKind,
    pub name: String,
    /// Group namespace the model is scoped to; models under
    /// [`COMMONS_GROUP`] are visible to every group.
    pub engine_group: String,
    #[serde(default)]
    pub metadata_schema: FieldSchema,
    #[serde(default)]
    pub measure_slots: Vec<MeasureSlot>,
}

impl ModelDefinition {
    /// Deterministic document id derived from kind and model name.
    pub fn document_id(&self) -> String {
        format!("{}-{}", self.kind, self.name)
    }

    /// Names of the measure slots this model declares.
    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.measure_slots.iter().map(|slot| slot.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_is_kind_scoped() {
        let model = ModelDefinition {
            kind: ModelKind::Measure,
            name: "temperature".to_string(),
            engine_group: COMMONS_GROUP.to_string(),
            metadata_schema: FieldSchema::new(),
            measure_slots: Vec::new(),
        };
        assert_eq!(model.document_id(), "measure-temperature");
    }
}
