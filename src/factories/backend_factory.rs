use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::interfaces::storage::{BackendKind, StorageBackend};
use crate::providers::local::LocalStorageProvider;
use crate::providers::memory::InMemoryStorageProvider;
use crate::providers::sqlite::SqliteStorageProvider;

/// Picks the persistence strategy from the configuration. The decision is
/// made exactly once, before the server starts; everything downstream
/// holds a `dyn StorageBackend` and never branches on the variant again.
pub struct BackendFactory;

impl BackendFactory {
    pub fn resolve_kind(config: &Config) -> BackendKind {
        let storage = config.storage.as_ref();
        let database_path = storage
            .and_then(|s| s.database_path.as_deref())
            .filter(|p| !p.trim().is_empty());
        if database_path.is_some() {
            return BackendKind::Hosted;
        }
        let profile_dir = storage
            .and_then(|s| s.profile_dir.as_deref())
            .filter(|p| !p.trim().is_empty());
        if profile_dir.is_some() {
            return BackendKind::ClientLocal;
        }
        BackendKind::InMemory
    }

    pub async fn create_from_config(config: &Config) -> Result<Arc<dyn StorageBackend>> {
        let kind = Self::resolve_kind(config);
        match kind {
            BackendKind::Hosted => {
                let path = config
                    .storage
                    .as_ref()
                    .and_then(|s| s.database_path.as_deref())
                    .unwrap_or_default();
                let backend = SqliteStorageProvider::new(path).await?;
                tracing::info!(backend = kind.as_str(), path, "storage backend ready");
                Ok(Arc::new(backend))
            }
            BackendKind::ClientLocal => {
                let dir = config
                    .storage
                    .as_ref()
                    .and_then(|s| s.profile_dir.as_deref())
                    .unwrap_or_default();
                tracing::info!(backend = kind.as_str(), dir, "storage backend ready");
                Ok(Arc::new(LocalStorageProvider::new(dir)))
            }
            BackendKind::InMemory => {
                tracing::warn!(
                    backend = kind.as_str(),
                    "no database configured, chats will not survive a restart"
                );
                if config.is_production() {
                    tracing::error!(
                        "running the in-memory backend in production, persistence is disabled"
                    );
                }
                Ok(Arc::new(InMemoryStorageProvider::new()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;

    fn config_with(storage: StorageConfig) -> Config {
        Config {
            storage: Some(storage),
            ..Config::default()
        }
    }

    #[test]
    fn database_path_wins_over_profile_dir() {
        let config = config_with(StorageConfig {
            database_path: Some("./data/parley.db".to_string()),
            profile_dir: Some("./profile".to_string()),
            query_timeout_ms: None,
        });
        assert_eq!(BackendFactory::resolve_kind(&config), BackendKind::Hosted);
    }

    #[test]
    fn profile_dir_selects_client_local() {
        let config = config_with(StorageConfig {
            database_path: None,
            profile_dir: Some("./profile".to_string()),
            query_timeout_ms: None,
        });
        assert_eq!(
            BackendFactory::resolve_kind(&config),
            BackendKind::ClientLocal
        );
    }

    #[test]
    fn empty_paths_fall_back_to_in_memory() {
        let config = config_with(StorageConfig {
            database_path: Some("   ".to_string()),
            profile_dir: None,
            query_timeout_ms: None,
        });
        assert_eq!(BackendFactory::resolve_kind(&config), BackendKind::InMemory);

        assert_eq!(
            BackendFactory::resolve_kind(&Config::default()),
            BackendKind::InMemory
        );
    }
}
