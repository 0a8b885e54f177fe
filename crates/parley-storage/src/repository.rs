//! Repository implementations for SQLite-backed persistence.
//!
//! Each table has a row type holding the serialized form of its entity and
//! free functions operating on a borrowed `Connection`, so they can run
//! either standalone or inside a `Database::with_transaction` closure.
//! The `*Repository` structs wrap those functions for direct use.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use parley_core::error::ParleyError;
use parley_core::history::{HistoryRecord, TurnError};
use parley_core::types::{Actor, DataMap, Outcome, Session};

use crate::db::{storage_err, Database};

// ============================================================================
// Serialized rows.
// ============================================================================

/// A session ready to be written: topic normalized, data encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub id: String,
    pub topic: Option<String>,
    pub data: String,
}

impl SessionRow {
    pub fn from_session(session: &Session) -> Result<Self, ParleyError> {
        let mut normalized = session.clone();
        normalized.normalize();
        Ok(Self {
            id: normalized.id,
            topic: normalized.topic,
            data: serde_json::to_string(&normalized.data)?,
        })
    }
}

/// An actor ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorRow {
    pub id: String,
    pub display_name: Option<String>,
    pub locale: Option<String>,
    pub avatar_url: Option<String>,
    pub status_message: Option<String>,
    pub data: String,
}

impl ActorRow {
    pub fn from_actor(actor: &Actor) -> Result<Self, ParleyError> {
        Ok(Self {
            id: actor.id.clone(),
            display_name: actor.display_name.clone(),
            locale: actor.locale.clone(),
            avatar_url: actor.avatar_url.clone(),
            status_message: actor.status_message.clone(),
            data: serde_json::to_string(&actor.data)?,
        })
    }
}

/// A history record with every JSON column encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub id: String,
    pub source_id: String,
    pub created_at: i64,
    pub request: Option<String>,
    pub intent: Option<String>,
    pub entities: String,
    pub response: Option<String>,
    pub session_on_start: Option<String>,
    pub session_on_end: Option<String>,
    pub actor_on_start: Option<String>,
    pub actor_on_end: Option<String>,
    pub response_time_ms: i64,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
}

impl HistoryRow {
    pub fn from_record(record: &HistoryRecord) -> Result<Self, ParleyError> {
        Ok(Self {
            id: record.id.to_string(),
            source_id: record.source_id.clone(),
            created_at: record.created_at.timestamp_millis(),
            request: encode_opt(record.request.as_ref())?,
            intent: record.intent.clone(),
            entities: serde_json::to_string(&record.entities)?,
            response: record
                .response
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            session_on_start: encode_opt(record.session_on_start.as_ref())?,
            session_on_end: encode_opt(record.session_on_end.as_ref())?,
            actor_on_start: encode_opt(record.actor_on_start.as_ref())?,
            actor_on_end: encode_opt(record.actor_on_end.as_ref())?,
            response_time_ms: i64::try_from(record.response_time_ms).unwrap_or(i64::MAX),
            error_message: record.error.as_ref().map(|e| e.message.clone()),
            error_trace: record.error.as_ref().map(|e| e.trace.clone()),
        })
    }
}

fn encode_opt(value: Option<&Value>) -> Result<Option<String>, ParleyError> {
    Ok(value.map(serde_json::to_string).transpose()?)
}

// ============================================================================
// Connection-level operations.
// ============================================================================

pub fn load_session(conn: &Connection, id: &str) -> Result<Option<Session>, ParleyError> {
    conn.query_row(
        "SELECT id, topic, data, updated_at FROM sessions WHERE id = ?1",
        [id],
        |row| Ok(row_to_session(row)),
    )
    .optional()
    .map_err(storage_err)?
    .transpose()
}

/// Insert or replace a session, stamping `updated_at`.
pub fn upsert_session(
    conn: &Connection,
    row: &SessionRow,
    updated_at: DateTime<Utc>,
) -> Result<(), ParleyError> {
    conn.execute(
        "INSERT INTO sessions (id, topic, data, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
             topic = excluded.topic,
             data = excluded.data,
             updated_at = excluded.updated_at",
        rusqlite::params![row.id, row.topic, row.data, updated_at.timestamp_millis()],
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to save session: {}", e)))?;
    Ok(())
}

pub fn load_actor(conn: &Connection, id: &str) -> Result<Option<Actor>, ParleyError> {
    conn.query_row(
        "SELECT id, display_name, locale, avatar_url, status_message, data, updated_at
         FROM actors WHERE id = ?1",
        [id],
        |row| Ok(row_to_actor(row)),
    )
    .optional()
    .map_err(storage_err)?
    .transpose()
}

/// Insert or replace an actor, stamping `updated_at`.
pub fn upsert_actor(
    conn: &Connection,
    row: &ActorRow,
    updated_at: DateTime<Utc>,
) -> Result<(), ParleyError> {
    conn.execute(
        "INSERT INTO actors (id, display_name, locale, avatar_url, status_message, data, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
             display_name = excluded.display_name,
             locale = excluded.locale,
             avatar_url = excluded.avatar_url,
             status_message = excluded.status_message,
             data = excluded.data,
             updated_at = excluded.updated_at",
        rusqlite::params![
            row.id,
            row.display_name,
            row.locale,
            row.avatar_url,
            row.status_message,
            row.data,
            updated_at.timestamp_millis(),
        ],
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to save actor: {}", e)))?;
    Ok(())
}

pub fn insert_history(conn: &Connection, row: &HistoryRow) -> Result<(), ParleyError> {
    conn.execute(
        "INSERT INTO history (id, source_id, created_at, request, intent, entities, response,
                              session_on_start, session_on_end, actor_on_start, actor_on_end,
                              response_time_ms, error_message, error_trace)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        rusqlite::params![
            row.id,
            row.source_id,
            row.created_at,
            row.request,
            row.intent,
            row.entities,
            row.response,
            row.session_on_start,
            row.session_on_end,
            row.actor_on_start,
            row.actor_on_end,
            row.response_time_ms,
            row.error_message,
            row.error_trace,
        ],
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to append history: {}", e)))?;
    Ok(())
}

fn count_rows(conn: &Connection, table: &str) -> Result<u64, ParleyError> {
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    let count: i64 = conn
        .query_row(&sql, [], |row| row.get(0))
        .map_err(storage_err)?;
    Ok(count as u64)
}

// ============================================================================
// Repositories.
// ============================================================================

/// Repository for conversation sessions.
pub struct SessionRepository {
    db: Arc<Database>,
}

impl SessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn find(&self, id: &str) -> Result<Option<Session>, ParleyError> {
        self.db.with_conn(|conn| load_session(conn, id))
    }

    /// Store a session, keeping its own `updated_at`.
    pub fn save(&self, session: &Session) -> Result<(), ParleyError> {
        let row = SessionRow::from_session(session)?;
        self.db
            .with_conn(|conn| upsert_session(conn, &row, session.updated_at))
    }

    pub fn count(&self) -> Result<u64, ParleyError> {
        self.db.with_conn(|conn| count_rows(conn, "sessions"))
    }
}

/// Repository for actors.
pub struct ActorRepository {
    db: Arc<Database>,
}

impl ActorRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn find(&self, id: &str) -> Result<Option<Actor>, ParleyError> {
        self.db.with_conn(|conn| load_actor(conn, id))
    }

    pub fn save(&self, actor: &Actor) -> Result<(), ParleyError> {
        let row = ActorRow::from_actor(actor)?;
        self.db
            .with_conn(|conn| upsert_actor(conn, &row, actor.updated_at))
    }

    pub fn count(&self) -> Result<u64, ParleyError> {
        self.db.with_conn(|conn| count_rows(conn, "actors"))
    }
}

/// Repository for history records. Records are append-only.
pub struct HistoryRepository {
    db: Arc<Database>,
}

const HISTORY_COLUMNS: &str = "id, source_id, created_at, request, intent, entities, response,
     session_on_start, session_on_end, actor_on_start, actor_on_end,
     response_time_ms, error_message, error_trace";

impl HistoryRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn append(&self, record: &HistoryRecord) -> Result<(), ParleyError> {
        let row = HistoryRow::from_record(record)?;
        self.db.with_conn(|conn| insert_history(conn, &row))
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<HistoryRecord>, ParleyError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {} FROM history WHERE id = ?1", HISTORY_COLUMNS);
            conn.query_row(&sql, [id.to_string()], |row| Ok(row_to_history(row)))
                .optional()
                .map_err(storage_err)?
                .transpose()
        })
    }

    /// Most recent records for one source, newest first.
    pub fn recent_for_source(
        &self,
        source_id: &str,
        limit: u64,
    ) -> Result<Vec<HistoryRecord>, ParleyError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM history
                 WHERE source_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2",
                HISTORY_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(rusqlite::params![source_id, limit], |row| {
                    Ok(row_to_history(row))
                })
                .map_err(storage_err)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(storage_err)??);
            }
            Ok(records)
        })
    }

    pub fn count(&self) -> Result<u64, ParleyError> {
        self.db.with_conn(|conn| count_rows(conn, "history"))
    }
}

// ============================================================================
// Helper functions for row-to-entity conversion.
// ============================================================================

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn decode_map(text: &str) -> Result<DataMap, ParleyError> {
    Ok(serde_json::from_str(text)?)
}

fn decode_opt(text: Option<String>) -> Result<Option<Value>, ParleyError> {
    Ok(text.as_deref().map(serde_json::from_str).transpose()?)
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, ParleyError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let topic: Option<String> = row.get(1).map_err(storage_err)?;
    let data: String = row.get(2).map_err(storage_err)?;
    let updated_at: i64 = row.get(3).map_err(storage_err)?;

    Ok(Session {
        id,
        topic,
        data: decode_map(&data)?,
        updated_at: millis_to_datetime(updated_at),
    })
}

fn row_to_actor(row: &rusqlite::Row<'_>) -> Result<Actor, ParleyError> {
    let data: String = row.get(5).map_err(storage_err)?;
    let updated_at: i64 = row.get(6).map_err(storage_err)?;

    Ok(Actor {
        id: row.get(0).map_err(storage_err)?,
        display_name: row.get(1).map_err(storage_err)?,
        locale: row.get(2).map_err(storage_err)?,
        avatar_url: row.get(3).map_err(storage_err)?,
        status_message: row.get(4).map_err(storage_err)?,
        data: decode_map(&data)?,
        updated_at: millis_to_datetime(updated_at),
    })
}

fn row_to_history(row: &rusqlite::Row<'_>) -> Result<HistoryRecord, ParleyError> {
    let id_str: String = row.get(0).map_err(storage_err)?;
    let created_at: i64 = row.get(2).map_err(storage_err)?;
    let entities: String = row.get(5).map_err(storage_err)?;
    let response: Option<String> = row.get(6).map_err(storage_err)?;
    let response_time_ms: i64 = row.get(11).map_err(storage_err)?;
    let error_message: Option<String> = row.get(12).map_err(storage_err)?;
    let error_trace: Option<String> = row.get(13).map_err(storage_err)?;

    let response: Option<Outcome> = response
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    Ok(HistoryRecord {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| ParleyError::Storage(format!("Invalid UUID: {}", e)))?,
        source_id: row.get(1).map_err(storage_err)?,
        created_at: millis_to_datetime(created_at),
        request: decode_opt(row.get(3).map_err(storage_err)?)?,
        intent: row.get(4).map_err(storage_err)?,
        entities: decode_map(&entities)?,
        response,
        session_on_start: decode_opt(row.get(7).map_err(storage_err)?)?,
        session_on_end: decode_opt(row.get(8).map_err(storage_err)?)?,
        actor_on_start: decode_opt(row.get(9).map_err(storage_err)?)?,
        actor_on_end: decode_opt(row.get(10).map_err(storage_err)?)?,
        response_time_ms: response_time_ms.max(0) as u64,
        error: error_message.map(|message| TurnError {
            message,
            trace: error_trace.unwrap_or_default(),
        }),
    })
}
