use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::domains::records::{
    ChatRecord, DocumentRecord, MessageRecord, StreamRecord, SuggestionRecord, UserRecord,
    Visibility, VoteRecord,
};
use crate::error::Result;
use crate::interfaces::storage::{BackendKind, StorageBackend};

#[derive(Default)]
struct StoreInner {
    users: Vec<UserRecord>,
    chats: Vec<ChatRecord>,
    messages: Vec<MessageRecord>,
    votes: Vec<VoteRecord>,
    documents: Vec<DocumentRecord>,
    suggestions: Vec<SuggestionRecord>,
    streams: Vec<StreamRecord>,
}

/// Zero-configuration fallback store. All records live in process-owned
/// vectors behind a single mutex; every read-modify-write sequence holds
/// the lock for its whole duration, so cascades are atomic per call.
///
/// Data is shared across all users of the process and lost on restart.
/// Never suitable as a production store of record.
#[derive(Default)]
pub struct InMemoryStorageProvider {
    store: Mutex<StoreInner>,
}

impl InMemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorageProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    async fn create_user(&self, user: UserRecord) -> Result<UserRecord> {
        let mut store = self.store.lock().await;
        store.users.push(user.clone());
        Ok(user)
    }

    async fn users_by_email(&self, email: &str) -> Result<Vec<UserRecord>> {
        let store = self.store.lock().await;
        Ok(store
            .users
            .iter()
            .filter(|u| u.email == email)
            .cloned()
            .collect())
    }

    async fn ensure_user(&self, user: UserRecord) -> Result<()> {
        let mut store = self.store.lock().await;
        if !store.users.iter().any(|u| u.id == user.id) {
            store.users.push(user);
        }
        Ok(())
    }

    async fn save_chat(&self, chat: ChatRecord) -> Result<ChatRecord> {
        let mut store = self.store.lock().await;
        store.chats.push(chat.clone());
        Ok(chat)
    }

    async fn chat_by_id(&self, id: &str) -> Result<Option<ChatRecord>> {
        let store = self.store.lock().await;
        Ok(store.chats.iter().find(|c| c.id == id).cloned())
    }

    async fn chats_by_user(&self, user_id: &str) -> Result<Vec<ChatRecord>> {
        let store = self.store.lock().await;
        let mut chats: Vec<ChatRecord> = store
            .chats
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(chats)
    }

    async fn delete_chat(&self, id: &str) -> Result<Option<ChatRecord>> {
        let mut store = self.store.lock().await;
        store.votes.retain(|v| v.chat_id != id);
        store.messages.retain(|m| m.chat_id != id);
        store.streams.retain(|s| s.chat_id != id);
        let position = store.chats.iter().position(|c| c.id == id);
        Ok(position.map(|idx| store.chats.remove(idx)))
    }

    async fn update_chat_title(&self, chat_id: &str, title: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        if let Some(chat) = store.chats.iter_mut().find(|c| c.id == chat_id) {
            chat.title = title.to_string();
        }
        Ok(())
    }

    async fn update_chat_visibility(&self, chat_id: &str, visibility: Visibility) -> Result<()> {
        let mut store = self.store.lock().await;
        if let Some(chat) = store.chats.iter_mut().find(|c| c.id == chat_id) {
            chat.visibility = visibility;
        }
        Ok(())
    }

    async fn update_chat_last_context(&self, chat_id: &str, context: Value) -> Result<()> {
        let mut store = self.store.lock().await;
        if let Some(chat) = store.chats.iter_mut().find(|c| c.id == chat_id) {
            chat.last_context = Some(context);
        }
        Ok(())
    }

    async fn save_messages(&self, messages: Vec<MessageRecord>) -> Result<Vec<MessageRecord>> {
        let mut store = self.store.lock().await;
        store.messages.extend(messages.iter().cloned());
        Ok(messages)
    }

    async fn messages_by_chat(&self, chat_id: &str) -> Result<Vec<MessageRecord>> {
        let store = self.store.lock().await;
        let mut messages: Vec<MessageRecord> = store
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn message_by_id(&self, id: &str) -> Result<Option<MessageRecord>> {
        let store = self.store.lock().await;
        Ok(store.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn delete_messages_from(&self, chat_id: &str, cutoff_ms: i64) -> Result<usize> {
        let mut store = self.store.lock().await;
        let doomed: HashSet<String> = store
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id && m.created_at >= cutoff_ms)
            .map(|m| m.id.clone())
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        store
            .votes
            .retain(|v| !(v.chat_id == chat_id && doomed.contains(&v.message_id)));
        store.messages.retain(|m| !doomed.contains(&m.id));
        Ok(doomed.len())
    }

    async fn user_message_count_since(&self, user_id: &str, since_ms: i64) -> Result<usize> {
        let store = self.store.lock().await;
        let chat_ids: HashSet<&str> = store
            .chats
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.id.as_str())
            .collect();
        Ok(store
            .messages
            .iter()
            .filter(|m| {
                chat_ids.contains(m.chat_id.as_str())
                    && m.created_at >= since_ms
                    && m.role == crate::domains::records::Role::User
            })
            .count())
    }

    async fn upsert_vote(&self, vote: VoteRecord) -> Result<VoteRecord> {
        let mut store = self.store.lock().await;
        if let Some(existing) = store
            .votes
            .iter_mut()
            .find(|v| v.chat_id == vote.chat_id && v.message_id == vote.message_id)
        {
            existing.is_upvoted = vote.is_upvoted;
            return Ok(existing.clone());
        }
        store.votes.push(vote.clone());
        Ok(vote)
    }

    async fn votes_by_chat(&self, chat_id: &str) -> Result<Vec<VoteRecord>> {
        let store = self.store.lock().await;
        Ok(store
            .votes
            .iter()
            .filter(|v| v.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn save_document(&self, document: DocumentRecord) -> Result<DocumentRecord> {
        let mut store = self.store.lock().await;
        store.documents.push(document.clone());
        Ok(document)
    }

    async fn documents_by_id(&self, id: &str) -> Result<Vec<DocumentRecord>> {
        let store = self.store.lock().await;
        let mut documents: Vec<DocumentRecord> = store
            .documents
            .iter()
            .filter(|d| d.id == id)
            .cloned()
            .collect();
        documents.sort_by_key(|d| d.created_at);
        Ok(documents)
    }

    async fn delete_documents_after(
        &self,
        id: &str,
        cutoff_ms: i64,
    ) -> Result<Vec<DocumentRecord>> {
        let mut store = self.store.lock().await;
        store
            .suggestions
            .retain(|s| !(s.document_id == id && s.document_created_at > cutoff_ms));
        let (deleted, kept): (Vec<DocumentRecord>, Vec<DocumentRecord>) = store
            .documents
            .drain(..)
            .partition(|d| d.id == id && d.created_at > cutoff_ms);
        store.documents = kept;
        Ok(deleted)
    }

    async fn save_suggestions(
        &self,
        suggestions: Vec<SuggestionRecord>,
    ) -> Result<Vec<SuggestionRecord>> {
        let mut store = self.store.lock().await;
        store.suggestions.extend(suggestions.iter().cloned());
        Ok(suggestions)
    }

    async fn suggestions_by_document(&self, document_id: &str) -> Result<Vec<SuggestionRecord>> {
        let store = self.store.lock().await;
        Ok(store
            .suggestions
            .iter()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn create_stream(&self, stream: StreamRecord) -> Result<()> {
        let mut store = self.store.lock().await;
        store.streams.push(stream);
        Ok(())
    }

    async fn stream_ids_by_chat(&self, chat_id: &str) -> Result<Vec<String>> {
        let store = self.store.lock().await;
        let mut streams: Vec<&StreamRecord> = store
            .streams
            .iter()
            .filter(|s| s.chat_id == chat_id)
            .collect();
        streams.sort_by_key(|s| s.created_at);
        Ok(streams.into_iter().map(|s| s.id.clone()).collect())
    }
}
