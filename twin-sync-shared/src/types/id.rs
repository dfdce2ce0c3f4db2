use std::fmt;

use serde::{Deserialize, Serialize};

/// The two shapes a digital twin can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwinKind {
    Asset,
    Device,
}

impl TwinKind {
    /// Name of the per-engine collection holding twins of this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            TwinKind::Asset => "assets",
            TwinKind::Device => "devices",
        }
    }
}

impl fmt::Display for TwinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TwinKind::Asset => write!(f, "asset"),
            TwinKind::Device => write!(f, "device"),
        }
    }
}

/// Composite identity of a digital twin.
///
/// The `{model, reference}` pair forms the document id; the kind selects
/// the collection the document lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TwinId {
    pub kind: TwinKind,
    pub model: String,
    pub reference: String,
}

impl TwinId {
    pub fn new(kind: TwinKind, model: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
            reference: reference.into(),
        }
    }

    /// Deterministic document id derived from the composite identity.
    pub fn document_id(&self) -> String {
        format!("{}-{}", self.model, self.reference)
    }

    /// Key used for per-twin mutual exclusion.
    pub fn lock_key(&self) -> String {
        format!("{}:{}", self.kind, self.document_id())
    }
}

impl fmt::Display for TwinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.document_id())
    }
}
