//! Transactional session store.
//!
//! A `StoreConnection` is opened once per batch. Each turn reads sessions and
//! actors, stages the mutated copies (serialized at staging time) and the
//! history record, then commits them in a single SQLite transaction or
//! discards them on rollback.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use parley_core::error::Result;
use parley_core::history::HistoryRecord;
use parley_core::types::{Actor, Session};

use crate::db::Database;
use crate::repository::{
    insert_history, load_actor, load_session, upsert_actor, upsert_session, ActorRow, HistoryRow,
    SessionRow,
};

/// Source of per-batch store connections.
pub trait SessionStore: Send + Sync {
    /// Open a connection for one batch. Fails with
    /// `ParleyError::Unavailable` when the backing store cannot be reached.
    fn connect(&self) -> Result<Box<dyn StoreConnection>>;
}

/// One batch's view of the store. Writes are buffered until `commit`.
pub trait StoreConnection: Send {
    /// Load the session for `id`, or a fresh empty one if none is stored.
    fn get_or_create_session(&mut self, id: &str) -> Result<Session>;

    /// Load the actor for `id`, or a fresh one if none is stored.
    fn get_or_create_actor(&mut self, id: &str) -> Result<Actor>;

    /// Serialize the session and queue it for the next commit.
    fn stage_session(&mut self, session: &Session) -> Result<()>;

    /// Serialize the actor and queue it for the next commit.
    fn stage_actor(&mut self, actor: &Actor) -> Result<()>;

    /// Queue a history record for the next commit.
    fn append_history(&mut self, record: &HistoryRecord) -> Result<()>;

    /// Write everything staged since the last commit atomically.
    fn commit(&mut self) -> Result<()>;

    /// Discard everything staged since the last commit.
    fn rollback(&mut self);
}

/// SQLite-backed `SessionStore`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Arc::new(Database::new(path)?)))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(Database::in_memory()?)))
    }

    pub fn database(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }
}

impl SessionStore for SqliteStore {
    fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        self.db.ping()?;
        Ok(Box::new(SqliteConnection {
            db: Arc::clone(&self.db),
            pending: UnitOfWork::default(),
        }))
    }
}

#[derive(Debug, Default)]
struct UnitOfWork {
    sessions: Vec<SessionRow>,
    actors: Vec<ActorRow>,
    history: Vec<HistoryRow>,
}

impl UnitOfWork {
    fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.actors.is_empty() && self.history.is_empty()
    }
}

struct SqliteConnection {
    db: Arc<Database>,
    pending: UnitOfWork,
}

impl StoreConnection for SqliteConnection {
    fn get_or_create_session(&mut self, id: &str) -> Result<Session> {
        let found = self.db.with_conn(|conn| load_session(conn, id))?;
        Ok(found.unwrap_or_else(|| Session::new(id, Utc::now())))
    }

    fn get_or_create_actor(&mut self, id: &str) -> Result<Actor> {
        let found = self.db.with_conn(|conn| load_actor(conn, id))?;
        Ok(found.unwrap_or_else(|| Actor::new(id, Utc::now())))
    }

    fn stage_session(&mut self, session: &Session) -> Result<()> {
        self.pending.sessions.push(SessionRow::from_session(session)?);
        Ok(())
    }

    fn stage_actor(&mut self, actor: &Actor) -> Result<()> {
        self.pending.actors.push(ActorRow::from_actor(actor)?);
        Ok(())
    }

    fn append_history(&mut self, record: &HistoryRecord) -> Result<()> {
        self.pending.history.push(HistoryRow::from_record(record)?);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let work = std::mem::take(&mut self.pending);
        if work.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        self.db.with_transaction(|tx| {
            for row in &work.sessions {
                upsert_session(tx, row, now)?;
            }
            for row in &work.actors {
                upsert_actor(tx, row, now)?;
            }
            for row in &work.history {
                insert_history(tx, row)?;
            }
            Ok(())
        })?;

        debug!(
            sessions = work.sessions.len(),
            actors = work.actors.len(),
            history = work.history.len(),
            "Committed unit of work"
        );
        Ok(())
    }

    fn rollback(&mut self) {
        self.pending = UnitOfWork::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{HistoryRepository, SessionRepository};
    use serde_json::json;

    #[test]
    fn test_get_or_create_returns_fresh_session() {
        let store = SqliteStore::in_memory().unwrap();
        let mut conn = store.connect().unwrap();
        let session = conn.get_or_create_session("u1").unwrap();
        assert_eq!(session.id, "u1");
        assert!(session.topic.is_none());
        assert!(session.data.is_empty());

        // Nothing is written until commit.
        let repo = SessionRepository::new(store.database());
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_commit_persists_staged_state() {
        let store = SqliteStore::in_memory().unwrap();
        let mut conn = store.connect().unwrap();

        let mut session = conn.get_or_create_session("u1").unwrap();
        session.topic = Some("echo".into());
        session.data.insert("n".into(), json!(1));
        let mut actor = conn.get_or_create_actor("u1").unwrap();
        actor.data.insert("seen".into(), json!(true));

        conn.stage_session(&session).unwrap();
        conn.stage_actor(&actor).unwrap();
        conn.append_history(&HistoryRecord::new("u1", Utc::now()))
            .unwrap();
        conn.commit().unwrap();

        let reloaded = conn.get_or_create_session("u1").unwrap();
        assert_eq!(reloaded.topic.as_deref(), Some("echo"));
        assert_eq!(reloaded.data.get("n"), Some(&json!(1)));
        let actor = conn.get_or_create_actor("u1").unwrap();
        assert_eq!(actor.data.get("seen"), Some(&json!(true)));
        assert_eq!(
            HistoryRepository::new(store.database()).count().unwrap(),
            1
        );
    }

    #[test]
    fn test_staging_snapshots_the_session() {
        let store = SqliteStore::in_memory().unwrap();
        let mut conn = store.connect().unwrap();

        let mut session = conn.get_or_create_session("u1").unwrap();
        session.topic = Some("echo".into());
        conn.stage_session(&session).unwrap();
        session.topic = Some("changed-after-staging".into());
        conn.commit().unwrap();

        let reloaded = conn.get_or_create_session("u1").unwrap();
        assert_eq!(reloaded.topic.as_deref(), Some("echo"));
    }

    #[test]
    fn test_rollback_discards_staged_state() {
        let store = SqliteStore::in_memory().unwrap();
        let mut conn = store.connect().unwrap();

        let mut session = conn.get_or_create_session("u1").unwrap();
        session.topic = Some("echo".into());
        conn.stage_session(&session).unwrap();
        conn.append_history(&HistoryRecord::new("u1", Utc::now()))
            .unwrap();
        conn.rollback();
        conn.commit().unwrap();

        assert_eq!(SessionRepository::new(store.database()).count().unwrap(), 0);
        assert_eq!(HistoryRepository::new(store.database()).count().unwrap(), 0);
    }

    #[test]
    fn test_commit_stamps_updated_at() {
        let store = SqliteStore::in_memory().unwrap();
        let mut conn = store.connect().unwrap();

        let mut session = conn.get_or_create_session("u1").unwrap();
        session.updated_at = chrono::DateTime::from_timestamp(0, 0).unwrap();
        let before = Utc::now();
        conn.stage_session(&session).unwrap();
        conn.commit().unwrap();

        let reloaded = conn.get_or_create_session("u1").unwrap();
        assert!(reloaded.updated_at >= before - chrono::Duration::milliseconds(1));
    }

    #[test]
    fn test_connections_share_committed_state() {
        let store = SqliteStore::in_memory().unwrap();
        let mut first = store.connect().unwrap();
        let mut session = first.get_or_create_session("u1").unwrap();
        session.topic = Some("echo".into());
        first.stage_session(&session).unwrap();
        first.commit().unwrap();

        let mut second = store.connect().unwrap();
        let seen = second.get_or_create_session("u1").unwrap();
        assert_eq!(seen.topic.as_deref(), Some("echo"));
    }
}
