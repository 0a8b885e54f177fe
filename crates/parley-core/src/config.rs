use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};
use crate::history::HistoryVerbosity;

/// Top-level configuration for Parley.
///
/// Loaded from `~/.parley/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.parley/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Event pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds of inactivity after which a session is cleared on load.
    pub stale_timeout_secs: u64,
    /// How much of each turn is written to the history table.
    pub history_verbosity: HistoryVerbosity,
    /// Number of batches processed concurrently.
    pub max_workers: usize,
}

impl EngineConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stale_timeout_secs: 300,
            history_verbosity: HistoryVerbosity::Full,
            max_workers: 4,
        }
    }
}

/// Webhook server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Maximum accepted webhook body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3040,
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ParleyConfig::default();
        assert_eq!(config.general.data_dir, "~/.parley/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.engine.stale_timeout_secs, 300);
        assert_eq!(config.engine.history_verbosity, HistoryVerbosity::Full);
        assert_eq!(config.engine.max_workers, 4);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3040);
        assert_eq!(config.server.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/custom/data"
log_level = "debug"

[engine]
stale_timeout_secs = 60
history_verbosity = "request_response_only"
max_workers = 8

[server]
host = "0.0.0.0"
port = 8080
"#;
        let file = create_temp_config(content);
        let config = ParleyConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/custom/data");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.engine.stale_timeout_secs, 60);
        assert_eq!(
            config.engine.history_verbosity,
            HistoryVerbosity::RequestResponseOnly
        );
        assert_eq!(config.engine.max_workers, 8);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        // Omitted field in a present section still defaults.
        assert_eq!(config.server.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[engine]
history_verbosity = "none"
"#;
        let file = create_temp_config(content);
        let config = ParleyConfig::load(file.path()).unwrap();
        assert_eq!(config.engine.history_verbosity, HistoryVerbosity::None);
        assert_eq!(config.engine.stale_timeout_secs, 300);
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_load_unknown_verbosity_fails() {
        let content = r#"
[engine]
history_verbosity = "everything"
"#;
        let file = create_temp_config(content);
        let result = ParleyConfig::load(file.path());
        assert!(matches!(result, Err(ParleyError::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ParleyConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.parley/data");
        assert_eq!(config.engine.stale_timeout_secs, 300);
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(ParleyConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_config_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = ParleyConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "~/.parley/data");
        assert_eq!(config.engine.max_workers, 4);
        assert_eq!(config.server.port, 3040);
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("dir").join("config.toml");

        let mut config = ParleyConfig::default();
        config.engine.stale_timeout_secs = 5;
        config.engine.history_verbosity = HistoryVerbosity::None;
        config.save(&path).unwrap();

        assert!(path.exists());
        let reloaded = ParleyConfig::load(&path).unwrap();
        assert_eq!(reloaded.engine.stale_timeout_secs, 5);
        assert_eq!(reloaded.engine.history_verbosity, HistoryVerbosity::None);
    }

    #[test]
    fn test_stale_timeout_duration() {
        let engine = EngineConfig {
            stale_timeout_secs: 90,
            ..EngineConfig::default()
        };
        assert_eq!(engine.stale_timeout(), Duration::from_secs(90));
    }
}
