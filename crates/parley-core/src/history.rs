//! Audit record written once per processed event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{DataMap, Outcome};

/// How much of each turn is written to history.
///
/// Ordered so that `verbosity > RequestResponseOnly` means "include state
/// snapshots".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryVerbosity {
    None,
    RequestResponseOnly,
    #[default]
    Full,
}

impl HistoryVerbosity {
    pub fn records_turns(self) -> bool {
        self > HistoryVerbosity::None
    }

    pub fn records_snapshots(self) -> bool {
        self > HistoryVerbosity::RequestResponseOnly
    }
}

/// A failure captured on a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnError {
    pub message: String,
    pub trace: String,
}

/// One processed event, as persisted in the history table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub source_id: String,
    pub created_at: DateTime<Utc>,
    pub request: Option<Value>,
    pub intent: Option<String>,
    pub entities: DataMap,
    pub response: Option<Outcome>,
    pub session_on_start: Option<Value>,
    pub session_on_end: Option<Value>,
    pub actor_on_start: Option<Value>,
    pub actor_on_end: Option<Value>,
    pub response_time_ms: u64,
    pub error: Option<TurnError>,
}

impl HistoryRecord {
    pub fn new(source_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.into(),
            created_at,
            request: None,
            intent: None,
            entities: DataMap::new(),
            response: None,
            session_on_start: None,
            session_on_end: None,
            actor_on_start: None,
            actor_on_end: None,
            response_time_ms: 0,
            error: None,
        }
    }
}
