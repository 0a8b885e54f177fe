//! Route handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_storage::{HistoryRepository, SessionRepository};

use crate::error::ApiError;
use crate::state::AppState;

/// Response body for GET /health.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub sessions: u64,
    pub history_records: u64,
    pub busy_workers: usize,
    pub max_workers: usize,
}

/// Response body for POST /webhook.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub status: String,
    /// Number of events handed to the dispatcher.
    pub accepted: usize,
}

/// GET /health - liveness plus store counters.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let sessions = SessionRepository::new(state.database.clone()).count()?;
    let history_records = HistoryRepository::new(state.database.clone()).count()?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        sessions,
        history_records,
        busy_workers: state.dispatcher.busy_workers(),
        max_workers: state.dispatcher.max_workers(),
    }))
}

/// POST /webhook - accept a JSON array of raw events (or a single event
/// object) as one batch.
///
/// Returns as soon as the batch is queued; processing results are only
/// logged.
pub async fn webhook(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<WebhookAck>), ApiError> {
    let events = match body {
        Value::Array(events) => events,
        event @ Value::Object(_) => vec![event],
        _ => {
            return Err(ApiError::BadRequest(
                "body must be an event object or an array of events".to_string(),
            ))
        }
    };

    let accepted = events.len();
    if accepted > 0 {
        state
            .dispatcher
            .submit(events)
            .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))?;
    }
    tracing::debug!(events = accepted, "Webhook batch accepted");

    Ok((
        StatusCode::OK,
        Json(WebhookAck {
            status: "ok".to_string(),
            accepted,
        }),
    ))
}
