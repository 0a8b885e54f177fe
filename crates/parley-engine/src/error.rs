//! Error types for the event engine.

use std::error::Error as StdError;

use parley_core::error::ParleyError;

/// Errors surfaced by the pipeline and registry.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The raw event could not be turned into a request.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
    /// The store could not be reached at batch start.
    #[error("Store connection failed: {0}")]
    Connection(String),
    /// A turn failed in lookup, classification, routing, skill or delivery.
    #[error(transparent)]
    SkillExecution(#[from] SkillError),
    /// The unit of work could not be committed.
    #[error("Persistence failed: {0}")]
    Persistence(String),
    #[error("Skill topic must not be empty")]
    InvalidTopic,
    #[error("Dispatcher is shut down")]
    ShuttingDown,
}

/// Errors raised by skills and the capabilities around them.
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    /// A skill's own failure; displays as the raw message.
    #[error("{0}")]
    Failed(String),
    /// A failure carrying an underlying cause.
    #[error("{message}")]
    WithSource {
        message: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// A skill or capability panicked mid-turn.
    #[error("Panicked: {0}")]
    Panicked(String),
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error("Intent extraction failed: {0}")]
    Intent(String),
    #[error("Profile lookup failed: {0}")]
    Profile(String),
    #[error("Storage error: {0}")]
    Storage(#[from] ParleyError),
}

impl SkillError {
    pub fn failed(message: impl Into<String>) -> Self {
        SkillError::Failed(message.into())
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        SkillError::WithSource {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

/// Render an error and its `source()` chain, one cause per line.
pub fn error_trace(err: &(dyn StdError + 'static)) -> String {
    let mut trace = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        trace.push_str("\ncaused by: ");
        trace.push_str(&cause.to_string());
        current = cause.source();
    }
    trace
}
