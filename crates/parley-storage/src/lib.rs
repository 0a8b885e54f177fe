//! Parley Storage crate - SQLite persistence for sessions, actors and history.
//!
//! Provides a WAL-mode SQLite database with migrations, repositories for
//! each table, and `SqliteStore`, the transactional unit-of-work store the
//! engine commits every turn through.

pub mod db;
pub mod migrations;
pub mod repository;
pub mod store;

pub use db::Database;
pub use repository::{ActorRepository, HistoryRepository, SessionRepository};
pub use store::{SessionStore, SqliteStore, StoreConnection};
