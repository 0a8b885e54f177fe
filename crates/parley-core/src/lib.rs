pub mod config;
pub mod error;
pub mod history;
pub mod types;

pub use config::ParleyConfig;
pub use error::{ParleyError, Result};
pub use history::{HistoryRecord, HistoryVerbosity, TurnError};
pub use types::*;
