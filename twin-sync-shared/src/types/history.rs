use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TwinId;

/// The lifecycle transitions recorded in a twin's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryEventKind {
    Metadata,
    Link,
    Unlink,
    Measure,
}

/// An immutable record of a twin lifecycle change.
///
/// One collection per engine, append-only; the payload shape depends on
/// the event kind and is opaque to the appender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub twin_id: TwinId,
    pub kind: HistoryEventKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEvent {
    pub fn now(twin_id: TwinId, kind: HistoryEventKind, payload: serde_json::Value) -> Self {
        Self {
            twin_id,
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }
}
