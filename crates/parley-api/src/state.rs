//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use parley_core::config::ServerConfig;
use parley_engine::Dispatcher;
use parley_storage::Database;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Server settings (body limit, bind address).
    pub server: Arc<ServerConfig>,
    /// Runs submitted batches on the worker pool.
    pub dispatcher: Dispatcher,
    /// Database behind the session store, used for health counters.
    pub database: Arc<Database>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(server: ServerConfig, dispatcher: Dispatcher, database: Arc<Database>) -> Self {
        Self {
            server: Arc::new(server),
            dispatcher,
            database,
            start_time: Instant::now(),
        }
    }
}
