//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode on initialization and runs migrations.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, Transaction};
use tracing::info;

use parley_core::error::ParleyError;

use crate::migrations;

/// Map a rusqlite error into the shared storage error.
pub(crate) fn storage_err(e: rusqlite::Error) -> ParleyError {
    ParleyError::Storage(e.to_string())
}

/// Thread-safe SQLite database wrapper.
///
/// The connection is wrapped in a Mutex since rusqlite Connection is not Sync.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path and run pending
    /// migrations.
    pub fn new(path: &Path) -> Result<Self, ParleyError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| ParleyError::Unavailable(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| ParleyError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, ParleyError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ParleyError::Unavailable(format!("Failed to open in-memory db: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, ParleyError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ParleyError>
    where
        F: FnOnce(&Connection) -> Result<T, ParleyError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ParleyError::Unavailable(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a closure inside a transaction. Commits when the closure returns
    /// `Ok`; any error rolls everything back.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, ParleyError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, ParleyError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ParleyError::Unavailable(format!("Database lock poisoned: {}", e)))?;
        let tx = conn.transaction().map_err(storage_err)?;
        let value = f(&tx)?;
        tx.commit().map_err(storage_err)?;
        Ok(value)
    }

    /// Cheap liveness probe.
    pub fn ping(&self) -> Result<(), ParleyError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| ParleyError::Unavailable(e.to_string()))?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_sessions(db: &Database) -> i64 {
        db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
                .map_err(storage_err)
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(count_sessions(&db), 0);
        db.ping().unwrap();
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("parley.db");
        let db = Database::new(&path).unwrap();
        assert_eq!(count_sessions(&db), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("wal.db")).unwrap();
        let mode: String = db
            .with_conn(|conn| {
                conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
                    .map_err(storage_err)
            })
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::in_memory().unwrap();
        let result: Result<(), ParleyError> = db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO sessions (id, topic, data, updated_at) VALUES ('s1', NULL, '{}', 0)",
                [],
            )
            .map_err(storage_err)?;
            Err(ParleyError::Storage("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(count_sessions(&db), 0);
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let db = Database::in_memory().unwrap();
        db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO sessions (id, topic, data, updated_at) VALUES ('s1', NULL, '{}', 0)",
                [],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(count_sessions(&db), 1);
    }
}
