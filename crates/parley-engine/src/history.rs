//! Per-turn history capture.
//!
//! Snapshots are taken as JSON values at the moment they are recorded, so
//! later mutation of the live session or actor does not change them.

use std::error::Error as StdError;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use parley_core::history::{HistoryRecord, HistoryVerbosity, TurnError};
use parley_core::types::{Actor, Outcome, Request, Session};

use crate::error::error_trace;

/// Creates a `TurnRecord` for each event at the configured verbosity.
#[derive(Debug, Clone, Copy)]
pub struct HistoryRecorder {
    verbosity: HistoryVerbosity,
}

impl HistoryRecorder {
    pub fn new(verbosity: HistoryVerbosity) -> Self {
        Self { verbosity }
    }

    pub fn verbosity(&self) -> HistoryVerbosity {
        self.verbosity
    }

    pub fn begin(&self, request: &Request) -> TurnRecord {
        let mut record = HistoryRecord::new(request.source_id.clone(), Utc::now());
        record.request = snapshot(request);
        TurnRecord {
            record,
            verbosity: self.verbosity,
            started: Instant::now(),
        }
    }
}

impl Default for HistoryRecorder {
    fn default() -> Self {
        Self::new(HistoryVerbosity::default())
    }
}

/// The history record for one in-flight turn.
#[derive(Debug)]
pub struct TurnRecord {
    record: HistoryRecord,
    verbosity: HistoryVerbosity,
    started: Instant,
}

impl TurnRecord {
    pub fn session_on_start(&mut self, session: &Session) {
        if self.verbosity.records_snapshots() {
            self.record.session_on_start = snapshot(session);
        }
    }

    pub fn actor_on_start(&mut self, actor: Option<&Actor>) {
        if self.verbosity.records_snapshots() {
            self.record.actor_on_start = actor.and_then(snapshot);
        }
    }

    pub fn session_on_end(&mut self, session: &Session) {
        if self.verbosity.records_snapshots() {
            self.record.session_on_end = snapshot(session);
        }
    }

    pub fn actor_on_end(&mut self, actor: Option<&Actor>) {
        if self.verbosity.records_snapshots() {
            self.record.actor_on_end = actor.and_then(snapshot);
        }
    }

    pub fn classification(&mut self, request: &Request) {
        self.record.intent = request.intent.clone();
        self.record.entities = request.entities.clone();
    }

    pub fn response(&mut self, outcome: &Outcome) {
        self.record.response = Some(outcome.clone());
    }

    pub fn error(&mut self, err: &(dyn StdError + 'static)) {
        self.record.error = Some(TurnError {
            message: err.to_string(),
            trace: error_trace(err),
        });
    }

    pub fn has_error(&self) -> bool {
        self.record.error.is_some()
    }

    /// Stamp the elapsed time and hand back the record, or `None` when
    /// history is disabled.
    pub fn finish(mut self) -> Option<HistoryRecord> {
        let elapsed = self.started.elapsed().as_millis();
        self.record.response_time_ms = u64::try_from(elapsed).unwrap_or(u64::MAX);
        if self.verbosity.records_turns() {
            Some(self.record)
        } else {
            None
        }
    }
}

fn snapshot<T: Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to snapshot value for history");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::error::SkillError;

    fn request() -> Request {
        Request::new("u1", json!({"text": "hi"}))
    }

    #[test]
    fn test_snapshot_isolated_from_later_mutation() {
        let recorder = HistoryRecorder::new(HistoryVerbosity::Full);
        let mut turn = recorder.begin(&request());

        let mut session = Session::new("u1", Utc::now());
        session.topic = Some("echo".into());
        session.data.insert("n".into(), json!(1));
        turn.session_on_start(&session);

        session.data.insert("n".into(), json!(2));
        turn.session_on_end(&session);

        let record = turn.finish().unwrap();
        assert_eq!(record.session_on_start.unwrap()["data"]["n"], json!(1));
        assert_eq!(record.session_on_end.unwrap()["data"]["n"], json!(2));
    }

    #[test]
    fn test_request_response_only_skips_snapshots() {
        let recorder = HistoryRecorder::new(HistoryVerbosity::RequestResponseOnly);
        let mut turn = recorder.begin(&request());
        let session = Session::new("u1", Utc::now());
        turn.session_on_start(&session);
        turn.actor_on_start(Some(&Actor::new("u1", Utc::now())));
        turn.response(&Outcome::reply("hi"));

        let record = turn.finish().unwrap();
        assert!(record.session_on_start.is_none());
        assert!(record.actor_on_start.is_none());
        assert_eq!(record.response, Some(Outcome::reply("hi")));
        assert_eq!(record.request.unwrap()["text"], json!("hi"));
    }

    #[test]
    fn test_verbosity_none_produces_nothing() {
        let recorder = HistoryRecorder::new(HistoryVerbosity::None);
        let turn = recorder.begin(&request());
        assert!(turn.finish().is_none());
    }

    #[test]
    fn test_null_actor_snapshot() {
        let recorder = HistoryRecorder::new(HistoryVerbosity::Full);
        let mut turn = recorder.begin(&request());
        turn.actor_on_start(None);
        turn.actor_on_end(None);
        let record = turn.finish().unwrap();
        assert!(record.actor_on_start.is_none());
        assert!(record.actor_on_end.is_none());
    }

    #[test]
    fn test_error_recorded_with_message() {
        let recorder = HistoryRecorder::default();
        let mut turn = recorder.begin(&request());
        assert!(!turn.has_error());
        turn.error(&SkillError::failed("error in skill"));
        assert!(turn.has_error());

        let error = turn.finish().unwrap().error.unwrap();
        assert_eq!(error.message, "error in skill");
        assert_eq!(error.trace, "error in skill");
    }
}
