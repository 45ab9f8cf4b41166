use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::{ParleyError, Result};

const CACHE_CAPACITY: usize = 256;

/// Key-value mirror keyed by entity kind and owner id, e.g. `chats:u-42`.
pub fn cache_key(kind: &str, owner: &str) -> String {
    format!("{kind}:{owner}")
}

/// A cache, never a store of record.
///
/// Reads check the in-process map first, then the persistent file, then
/// fall back to empty. Writes update both together, with no
/// transactionality between the two. A crash between the writes leaves
/// them inconsistent, which is acceptable here and only here.
pub struct CacheLayer {
    map: Mutex<LruCache<String, Value>>,
    path: Option<PathBuf>,
}

impl CacheLayer {
    /// In-process only; nothing survives the process.
    pub fn in_process() -> Self {
        Self {
            map: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap())),
            path: None,
        }
    }

    /// Mirrored to a JSON file, private per profile directory.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            map: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap())),
            path: Some(path.into()),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut map = self.map.lock().await;
        if let Some(value) = map.get(key) {
            return Ok(Some(value.clone()));
        }
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let persisted = read_store(path)?;
        match persisted.get(key) {
            Some(value) => {
                map.put(key.to_string(), value.clone());
                Ok(Some(value.clone()))
            }
            None => Ok(None),
        }
    }

    pub async fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut map = self.map.lock().await;
        map.put(key.to_string(), value.clone());
        if let Some(path) = &self.path {
            let mut persisted = read_store(path)?;
            persisted.insert(key.to_string(), value);
            write_store(path, &persisted)?;
        }
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.map.lock().await;
        map.pop(key);
        if let Some(path) = &self.path {
            let mut persisted = read_store(path)?;
            if persisted.remove(key).is_some() {
                write_store(path, &persisted)?;
            }
        }
        Ok(())
    }
}

fn read_store(path: &Path) -> Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let content =
        std::fs::read_to_string(path).map_err(|e| ParleyError::Runtime(e.to_string()))?;
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    let value: Value =
        serde_json::from_str(&content).map_err(|e| ParleyError::Serialization(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn write_store(path: &Path, store: &Map<String, Value>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ParleyError::Runtime(e.to_string()))?;
    }
    let content = serde_json::to_string(store)
        .map_err(|e| ParleyError::Serialization(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| ParleyError::Runtime(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn in_process_cache_reads_back_writes() {
        let cache = CacheLayer::in_process();
        assert!(cache.get("chats:u1").await.unwrap().is_none());

        cache.put("chats:u1", json!([{"id": "c1"}])).await.unwrap();
        let value = cache.get("chats:u1").await.unwrap().unwrap();
        assert_eq!(value[0]["id"], "c1");

        cache.remove("chats:u1").await.unwrap();
        assert!(cache.get("chats:u1").await.unwrap().is_none());
    }

    #[test]
    fn cache_keys_are_kind_then_owner() {
        assert_eq!(cache_key("messages", "c9"), "messages:c9");
    }
}
