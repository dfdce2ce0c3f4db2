use serde::{Deserialize, Serialize};

use crate::types::ModelKind;

/// One field-path type mismatch between a proposed and a registered model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConflict {
    /// Dotted path of the conflicting field, e.g. `"building.floor"`.
    pub path: String,
    pub current_type: String,
    pub new_type: String,
}

/// A transient report of every type conflict a proposed model change would
/// introduce against one registered model. Produced, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictChunk {
    pub source_model: String,
    pub new_model: String,
    pub model_kind: ModelKind,
    pub conflicts: Vec<FieldConflict>,
}
