use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domains::records::now_ms;
use crate::entitlements::UserType;

const DEFAULT_TTL_MINUTES: u64 = 60 * 24;

/// A bearer session handed out at sign-in. Guests get one too, so every
/// request downstream carries a user id regardless of account type.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub user_type: UserType,
    #[serde(skip_serializing)]
    pub last_seen_ms: i64,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TTL_MINUTES * 60))
    }

    pub async fn issue(&self, user_id: &str, user_type: UserType) -> Session {
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            user_type,
            last_seen_ms: now_ms(),
        };
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.token.clone(), session.clone());
        session
    }

    /// Looks up a token and, when found, refreshes its idle clock.
    pub async fn resolve(&self, token: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(token)?;
        if now_ms() - session.last_seen_ms > self.ttl.as_millis() as i64 {
            sessions.remove(token);
            return None;
        }
        session.last_seen_ms = now_ms();
        Some(session.clone())
    }

    pub async fn revoke(&self, token: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(token).is_some()
    }

    pub async fn sweep_stale(&self) -> usize {
        let cutoff = now_ms() - self.ttl.as_millis() as i64;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.last_seen_ms >= cutoff);
        before - sessions.len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let removed = registry.sweep_stale().await;
                if removed > 0 {
                    tracing::debug!(removed, "swept stale sessions");
                }
            }
        })
    }
}
