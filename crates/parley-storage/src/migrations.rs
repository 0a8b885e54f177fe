//! Database schema migrations.
//!
//! Applies the initial schema: sessions, actors, history and
//! schema_migrations tables.

use rusqlite::Connection;
use tracing::info;

use parley_core::error::ParleyError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ParleyError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: sessions, actors and history.
///
/// Timestamps are unix milliseconds. `data`, snapshot and payload columns
/// hold JSON text.
fn apply_v1(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id              TEXT PRIMARY KEY NOT NULL,
            topic           TEXT,
            data            TEXT NOT NULL DEFAULT '{}',
            updated_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS actors (
            id              TEXT PRIMARY KEY NOT NULL,
            display_name    TEXT,
            locale          TEXT,
            avatar_url      TEXT,
            status_message  TEXT,
            data            TEXT NOT NULL DEFAULT '{}',
            updated_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS history (
            id                  TEXT PRIMARY KEY NOT NULL,
            source_id           TEXT NOT NULL,
            created_at          INTEGER NOT NULL,
            request             TEXT,
            intent              TEXT,
            entities            TEXT NOT NULL DEFAULT '{}',
            response            TEXT,
            session_on_start    TEXT,
            session_on_end      TEXT,
            actor_on_start      TEXT,
            actor_on_end        TEXT,
            response_time_ms    INTEGER NOT NULL DEFAULT 0,
            error_message       TEXT,
            error_trace         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_history_source
            ON history (source_id, created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_history_created
            ON history (created_at DESC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| ParleyError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
