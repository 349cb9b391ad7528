//! Model notification types

use crate::record::{Record, RecordId};
use serde::{Deserialize, Serialize};

/// Kinds of events announced by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Save,
    Delete,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Save => write!(f, "save"),
            EventKind::Delete => write!(f, "delete"),
        }
    }
}

/// Event carrying the affected record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEvent {
    pub kind: EventKind,
    pub table: String,
    pub id: RecordId,
    pub record: Record,
}

impl ModelEvent {
    pub fn new(kind: EventKind, table: impl Into<String>, id: RecordId, record: Record) -> Self {
        Self {
            kind,
            table: table.into(),
            id,
            record,
        }
    }
}
