//! Engine configuration
//!
//! ```toml
//! event_buffer = 128
//!
//! [parser]
//! max_include_depth = 8
//! default_error_action = "ignore"
//!
//! [retry]
//! max_retries = 5
//! initial_backoff_ms = 250
//! ```

use std::path::{Path, PathBuf};

use batchql_connection::RetryConfig;
use batchql_parser::ParserOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings shared by the parser and the engine. Every table is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub parser: ParserOptions,
    pub retry: RetryConfig,
    /// Capacity of the event channel used by `ExecutionEngine::spawn`
    pub event_buffer: usize,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    pub fn with_parser(mut self, parser: ParserOptions) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parser: ParserOptions::default(),
            retry: RetryConfig::default(),
            event_buffer: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchql_core::ErrorAction;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_tables() {
        let config = EngineConfig::from_toml_str(
            r#"
            event_buffer = 8

            [parser]
            default_error_action = "ignore"

            [retry]
            max_retries = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.event_buffer, 8);
        assert_eq!(config.parser.default_error_action, ErrorAction::Ignore);
        assert_eq!(config.parser.max_include_depth, 16);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.initial_backoff_ms, 100);
    }

    #[test]
    fn test_invalid_value() {
        let err = EngineConfig::from_toml_str("[parser]\ndefault_error_action = \"retry\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batchql.toml");
        std::fs::write(&path, "[retry]\njitter = true\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert!(config.retry.jitter);

        let missing = EngineConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(missing.to_string().contains("missing.toml"));
    }
}
