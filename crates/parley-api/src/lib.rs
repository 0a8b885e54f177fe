//! Parley API crate - axum webhook surface.
//!
//! Accepts batches of raw channel events over HTTP, hands them to the
//! engine's dispatcher without waiting for processing, and reports health.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
