use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::cache::{cache_key, CacheLayer};
use crate::domains::records::{
    ChatRecord, DocumentRecord, MessageRecord, Role, StreamRecord, SuggestionRecord, UserRecord,
    Visibility, VoteRecord,
};
use crate::error::{ParleyError, Result};
use crate::interfaces::storage::{BackendKind, StorageBackend};

const STORE_FILE: &str = "parley-local.json";

const USERS_KEY: &str = "users:all";
const CHAT_OWNER_INDEX: &str = "chat-owner:index";
const MESSAGE_CHAT_INDEX: &str = "message-chat:index";

/// Device-private backend persisting everything to one JSON file under the
/// profile directory. Records live in per-owner lists keyed like the cache
/// layer keys chats, plus two id-to-owner index maps so point lookups do
/// not scan every list.
///
/// Multi-key operations take the outer lock for their whole duration; the
/// store sees one operation at a time.
pub struct LocalStorageProvider {
    store: CacheLayer,
    guard: Mutex<()>,
}

impl LocalStorageProvider {
    pub fn new(profile_dir: impl AsRef<Path>) -> Self {
        let path: PathBuf = profile_dir.as_ref().join(STORE_FILE);
        Self {
            store: CacheLayer::with_file(path),
            guard: Mutex::new(()),
        }
    }

    async fn load_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        match self.store.get(key).await? {
            Some(value) => {
                serde_json::from_value(value).map_err(|e| ParleyError::Serialization(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    async fn store_list<T: Serialize>(&self, key: &str, items: &[T]) -> Result<()> {
        let value =
            serde_json::to_value(items).map_err(|e| ParleyError::Serialization(e.to_string()))?;
        self.store.put(key, value).await
    }

    async fn load_index(&self, key: &str) -> Result<HashMap<String, String>> {
        match self.store.get(key).await? {
            Some(value) => {
                serde_json::from_value(value).map_err(|e| ParleyError::Serialization(e.to_string()))
            }
            None => Ok(HashMap::new()),
        }
    }

    async fn store_index(&self, key: &str, index: &HashMap<String, String>) -> Result<()> {
        let value =
            serde_json::to_value(index).map_err(|e| ParleyError::Serialization(e.to_string()))?;
        self.store.put(key, value).await
    }

    async fn chat_owner(&self, chat_id: &str) -> Result<Option<String>> {
        let index = self.load_index(CHAT_OWNER_INDEX).await?;
        Ok(index.get(chat_id).cloned())
    }

    async fn chat_in_place<F>(&self, chat_id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut ChatRecord),
    {
        let Some(owner) = self.chat_owner(chat_id).await? else {
            return Ok(());
        };
        let key = cache_key("chats", &owner);
        let mut chats: Vec<ChatRecord> = self.load_list(&key).await?;
        if let Some(chat) = chats.iter_mut().find(|c| c.id == chat_id) {
            mutate(chat);
            self.store_list(&key, &chats).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalStorageProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::ClientLocal
    }

    async fn create_user(&self, user: UserRecord) -> Result<UserRecord> {
        let _guard = self.guard.lock().await;
        let mut users: Vec<UserRecord> = self.load_list(USERS_KEY).await?;
        users.push(user.clone());
        self.store_list(USERS_KEY, &users).await?;
        Ok(user)
    }

    async fn users_by_email(&self, email: &str) -> Result<Vec<UserRecord>> {
        let _guard = self.guard.lock().await;
        let users: Vec<UserRecord> = self.load_list(USERS_KEY).await?;
        Ok(users.into_iter().filter(|u| u.email == email).collect())
    }

    async fn ensure_user(&self, user: UserRecord) -> Result<()> {
        let _guard = self.guard.lock().await;
        let mut users: Vec<UserRecord> = self.load_list(USERS_KEY).await?;
        if users.iter().any(|u| u.id == user.id) {
            return Ok(());
        }
        users.push(user);
        self.store_list(USERS_KEY, &users).await
    }

    async fn save_chat(&self, chat: ChatRecord) -> Result<ChatRecord> {
        let _guard = self.guard.lock().await;
        let key = cache_key("chats", &chat.user_id);
        let mut chats: Vec<ChatRecord> = self.load_list(&key).await?;
        chats.push(chat.clone());
        self.store_list(&key, &chats).await?;

        let mut index = self.load_index(CHAT_OWNER_INDEX).await?;
        index.insert(chat.id.clone(), chat.user_id.clone());
        self.store_index(CHAT_OWNER_INDEX, &index).await?;
        Ok(chat)
    }

    async fn chat_by_id(&self, id: &str) -> Result<Option<ChatRecord>> {
        let _guard = self.guard.lock().await;
        let Some(owner) = self.chat_owner(id).await? else {
            return Ok(None);
        };
        let chats: Vec<ChatRecord> = self.load_list(&cache_key("chats", &owner)).await?;
        Ok(chats.into_iter().find(|c| c.id == id))
    }

    async fn chats_by_user(&self, user_id: &str) -> Result<Vec<ChatRecord>> {
        let _guard = self.guard.lock().await;
        let mut chats: Vec<ChatRecord> = self.load_list(&cache_key("chats", user_id)).await?;
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(chats)
    }

    async fn delete_chat(&self, id: &str) -> Result<Option<ChatRecord>> {
        let _guard = self.guard.lock().await;
        let Some(owner) = self.chat_owner(id).await? else {
            return Ok(None);
        };

        let chats_key = cache_key("chats", &owner);
        let mut chats: Vec<ChatRecord> = self.load_list(&chats_key).await?;
        let Some(position) = chats.iter().position(|c| c.id == id) else {
            return Ok(None);
        };
        let removed = chats.remove(position);
        self.store_list(&chats_key, &chats).await?;

        let messages: Vec<MessageRecord> = self.load_list(&cache_key("messages", id)).await?;
        if !messages.is_empty() {
            let mut message_index = self.load_index(MESSAGE_CHAT_INDEX).await?;
            for message in &messages {
                message_index.remove(&message.id);
            }
            self.store_index(MESSAGE_CHAT_INDEX, &message_index).await?;
        }
        self.store.remove(&cache_key("messages", id)).await?;
        self.store.remove(&cache_key("votes", id)).await?;
        self.store.remove(&cache_key("streams", id)).await?;

        let mut chat_index = self.load_index(CHAT_OWNER_INDEX).await?;
        chat_index.remove(id);
        self.store_index(CHAT_OWNER_INDEX, &chat_index).await?;
        Ok(Some(removed))
    }

    async fn update_chat_title(&self, chat_id: &str, title: &str) -> Result<()> {
        let _guard = self.guard.lock().await;
        let title = title.to_string();
        self.chat_in_place(chat_id, |chat| chat.title = title).await
    }

    async fn update_chat_visibility(&self, chat_id: &str, visibility: Visibility) -> Result<()> {
        let _guard = self.guard.lock().await;
        self.chat_in_place(chat_id, |chat| chat.visibility = visibility)
            .await
    }

    async fn update_chat_last_context(&self, chat_id: &str, context: Value) -> Result<()> {
        let _guard = self.guard.lock().await;
        self.chat_in_place(chat_id, |chat| chat.last_context = Some(context))
            .await
    }

    async fn save_messages(&self, records: Vec<MessageRecord>) -> Result<Vec<MessageRecord>> {
        let _guard = self.guard.lock().await;
        let mut by_chat: HashMap<String, Vec<MessageRecord>> = HashMap::new();
        for record in records.iter().cloned() {
            by_chat.entry(record.chat_id.clone()).or_default().push(record);
        }

        let mut message_index = self.load_index(MESSAGE_CHAT_INDEX).await?;
        for (chat_id, batch) in by_chat {
            let key = cache_key("messages", &chat_id);
            let mut messages: Vec<MessageRecord> = self.load_list(&key).await?;
            for message in batch {
                message_index.insert(message.id.clone(), chat_id.clone());
                messages.push(message);
            }
            self.store_list(&key, &messages).await?;
        }
        self.store_index(MESSAGE_CHAT_INDEX, &message_index).await?;
        Ok(records)
    }

    async fn messages_by_chat(&self, chat_id: &str) -> Result<Vec<MessageRecord>> {
        let _guard = self.guard.lock().await;
        let mut messages: Vec<MessageRecord> =
            self.load_list(&cache_key("messages", chat_id)).await?;
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn message_by_id(&self, id: &str) -> Result<Option<MessageRecord>> {
        let _guard = self.guard.lock().await;
        let index = self.load_index(MESSAGE_CHAT_INDEX).await?;
        let Some(chat_id) = index.get(id) else {
            return Ok(None);
        };
        let messages: Vec<MessageRecord> = self.load_list(&cache_key("messages", chat_id)).await?;
        Ok(messages.into_iter().find(|m| m.id == id))
    }

    async fn delete_messages_from(&self, chat_id: &str, cutoff_ms: i64) -> Result<usize> {
        let _guard = self.guard.lock().await;
        let messages_key = cache_key("messages", chat_id);
        let messages: Vec<MessageRecord> = self.load_list(&messages_key).await?;
        let (doomed, kept): (Vec<MessageRecord>, Vec<MessageRecord>) = messages
            .into_iter()
            .partition(|m| m.created_at >= cutoff_ms);
        if doomed.is_empty() {
            return Ok(0);
        }
        let doomed_ids: HashSet<&str> = doomed.iter().map(|m| m.id.as_str()).collect();

        let votes_key = cache_key("votes", chat_id);
        let votes: Vec<VoteRecord> = self.load_list(&votes_key).await?;
        let kept_votes: Vec<VoteRecord> = votes
            .into_iter()
            .filter(|v| !doomed_ids.contains(v.message_id.as_str()))
            .collect();
        self.store_list(&votes_key, &kept_votes).await?;

        let mut message_index = self.load_index(MESSAGE_CHAT_INDEX).await?;
        for message in &doomed {
            message_index.remove(&message.id);
        }
        self.store_index(MESSAGE_CHAT_INDEX, &message_index).await?;

        self.store_list(&messages_key, &kept).await?;
        Ok(doomed.len())
    }

    async fn user_message_count_since(&self, user_id: &str, since_ms: i64) -> Result<usize> {
        let _guard = self.guard.lock().await;
        let chats: Vec<ChatRecord> = self.load_list(&cache_key("chats", user_id)).await?;
        let mut count = 0;
        for chat in &chats {
            let messages: Vec<MessageRecord> =
                self.load_list(&cache_key("messages", &chat.id)).await?;
            count += messages
                .iter()
                .filter(|m| m.role == Role::User && m.created_at >= since_ms)
                .count();
        }
        Ok(count)
    }

    async fn upsert_vote(&self, vote: VoteRecord) -> Result<VoteRecord> {
        let _guard = self.guard.lock().await;
        let key = cache_key("votes", &vote.chat_id);
        let mut votes: Vec<VoteRecord> = self.load_list(&key).await?;
        match votes.iter_mut().find(|v| v.message_id == vote.message_id) {
            Some(existing) => existing.is_upvoted = vote.is_upvoted,
            None => votes.push(vote.clone()),
        }
        self.store_list(&key, &votes).await?;
        Ok(vote)
    }

    async fn votes_by_chat(&self, chat_id: &str) -> Result<Vec<VoteRecord>> {
        let _guard = self.guard.lock().await;
        self.load_list(&cache_key("votes", chat_id)).await
    }

    async fn save_document(&self, document: DocumentRecord) -> Result<DocumentRecord> {
        let _guard = self.guard.lock().await;
        let key = cache_key("documents", &document.id);
        let mut versions: Vec<DocumentRecord> = self.load_list(&key).await?;
        versions.push(document.clone());
        self.store_list(&key, &versions).await?;
        Ok(document)
    }

    async fn documents_by_id(&self, id: &str) -> Result<Vec<DocumentRecord>> {
        let _guard = self.guard.lock().await;
        let mut versions: Vec<DocumentRecord> =
            self.load_list(&cache_key("documents", id)).await?;
        versions.sort_by_key(|d| d.created_at);
        Ok(versions)
    }

    async fn delete_documents_after(
        &self,
        id: &str,
        cutoff_ms: i64,
    ) -> Result<Vec<DocumentRecord>> {
        let _guard = self.guard.lock().await;
        let documents_key = cache_key("documents", id);
        let versions: Vec<DocumentRecord> = self.load_list(&documents_key).await?;
        let (doomed, kept): (Vec<DocumentRecord>, Vec<DocumentRecord>) =
            versions.into_iter().partition(|d| d.created_at > cutoff_ms);
        if doomed.is_empty() {
            return Ok(doomed);
        }
        self.store_list(&documents_key, &kept).await?;

        let suggestions_key = cache_key("suggestions", id);
        let suggestions: Vec<SuggestionRecord> = self.load_list(&suggestions_key).await?;
        let kept_suggestions: Vec<SuggestionRecord> = suggestions
            .into_iter()
            .filter(|s| s.document_created_at <= cutoff_ms)
            .collect();
        self.store_list(&suggestions_key, &kept_suggestions).await?;
        Ok(doomed)
    }

    async fn save_suggestions(
        &self,
        records: Vec<SuggestionRecord>,
    ) -> Result<Vec<SuggestionRecord>> {
        let _guard = self.guard.lock().await;
        let mut by_document: HashMap<String, Vec<SuggestionRecord>> = HashMap::new();
        for record in records.iter().cloned() {
            by_document
                .entry(record.document_id.clone())
                .or_default()
                .push(record);
        }
        for (document_id, batch) in by_document {
            let key = cache_key("suggestions", &document_id);
            let mut suggestions: Vec<SuggestionRecord> = self.load_list(&key).await?;
            suggestions.extend(batch);
            self.store_list(&key, &suggestions).await?;
        }
        Ok(records)
    }

    async fn suggestions_by_document(&self, document_id: &str) -> Result<Vec<SuggestionRecord>> {
        let _guard = self.guard.lock().await;
        self.load_list(&cache_key("suggestions", document_id)).await
    }

    async fn create_stream(&self, stream: StreamRecord) -> Result<()> {
        let _guard = self.guard.lock().await;
        let key = cache_key("streams", &stream.chat_id);
        let mut streams: Vec<StreamRecord> = self.load_list(&key).await?;
        streams.push(stream);
        self.store_list(&key, &streams).await
    }

    async fn stream_ids_by_chat(&self, chat_id: &str) -> Result<Vec<String>> {
        let _guard = self.guard.lock().await;
        let mut streams: Vec<StreamRecord> = self.load_list(&cache_key("streams", chat_id)).await?;
        streams.sort_by_key(|s| s.created_at);
        Ok(streams.into_iter().map(|s| s.id).collect())
    }
}
