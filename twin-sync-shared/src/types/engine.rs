use serde::{Deserialize, Serialize};

/// One isolated tenant namespace holding twins, history and config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineDescriptor {
    pub id: String,
    /// Group the engine belongs to; models scoped to this group (or to
    /// `commons`) apply to its twins.
    pub group: String,
}
