use std::sync::Arc;

use serde_json::{Map, Value};

use crate::cache::CacheLayer;
use crate::error::Result;

pub const MAX_GUEST_QUERIES: u32 = 10;

const QUERY_COUNT_KEY: &str = "guest_query_count";
const USER_API_KEY_KEY: &str = "user_api_key";
const CHAT_TITLES_KEY: &str = "chat-titles";

/// Client-local usage accounting and settings, stored under fixed keys in
/// the cache layer. Library surface for embedding clients; the daemon
/// never consults it and enforces its own entitlements server-side. The
/// query counter is advisory, read by the UI to show remaining quota, and
/// is kept as a plain integer string.
pub struct ClientUsage {
    cache: Arc<CacheLayer>,
}

impl ClientUsage {
    pub fn new(cache: Arc<CacheLayer>) -> Self {
        Self { cache }
    }

    pub async fn query_count(&self) -> u32 {
        match self.cache.get(QUERY_COUNT_KEY).await {
            Ok(Some(Value::String(raw))) => raw.parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub async fn increment_query_count(&self) -> Result<u32> {
        let next = self.query_count().await + 1;
        self.cache
            .put(QUERY_COUNT_KEY, Value::String(next.to_string()))
            .await?;
        Ok(next)
    }

    pub async fn remaining_queries(&self) -> u32 {
        MAX_GUEST_QUERIES.saturating_sub(self.query_count().await)
    }

    pub async fn is_rate_limited(&self) -> bool {
        self.query_count().await >= MAX_GUEST_QUERIES
    }

    pub async fn user_api_key(&self) -> Option<String> {
        match self.cache.get(USER_API_KEY_KEY).await {
            Ok(Some(Value::String(key))) if !key.is_empty() => Some(key),
            _ => None,
        }
    }

    pub async fn set_user_api_key(&self, key: &str) -> Result<()> {
        self.cache
            .put(USER_API_KEY_KEY, Value::String(key.to_string()))
            .await
    }

    pub async fn chat_title_override(&self, chat_id: &str) -> Option<String> {
        match self.cache.get(CHAT_TITLES_KEY).await {
            Ok(Some(Value::Object(titles))) => titles
                .get(chat_id)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            _ => None,
        }
    }

    pub async fn set_chat_title_override(&self, chat_id: &str, title: &str) -> Result<()> {
        let mut titles = match self.cache.get(CHAT_TITLES_KEY).await? {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        titles.insert(chat_id.to_string(), Value::String(title.to_string()));
        self.cache.put(CHAT_TITLES_KEY, Value::Object(titles)).await
    }
}
