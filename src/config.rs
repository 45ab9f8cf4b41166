use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Path to the hosted-database file. Absent means the process degrades
    /// to the in-memory fallback (or the client-local store if a profile
    /// directory is configured).
    pub database_path: Option<String>,
    /// Directory for the client-local store and cache file.
    pub profile_dir: Option<String>,
    /// Per-call timeout applied by the query facade, in milliseconds.
    pub query_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModelConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub chat_model: Option<String>,
    pub reasoning_model: Option<String>,
    pub title_model: Option<String>,
    pub artifact_model: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub session_ttl_minutes: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub storage: Option<StorageConfig>,
    pub models: Option<ModelConfig>,
    pub server: Option<ServerConfig>,
    /// Marks a production deployment; controls the error-level log line
    /// emitted when the process falls back to in-memory storage.
    pub production: Option<bool>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ParleyError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ParleyError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.production.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_config() {
        let config: Config = serde_json::from_str(
            r#"{"storage": {"database_path": "./data/parley.db"}, "production": true}"#,
        )
        .unwrap();
        assert_eq!(
            config.storage.as_ref().unwrap().database_path.as_deref(),
            Some("./data/parley.db")
        );
        assert!(config.is_production());
        assert!(config.models.is_none());
    }
}
