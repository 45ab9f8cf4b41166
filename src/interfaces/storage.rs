use async_trait::async_trait;
use serde_json::Value;

use crate::domains::records::{
    ChatRecord, DocumentRecord, MessageRecord, StreamRecord, SuggestionRecord, UserRecord,
    Visibility, VoteRecord,
};
use crate::error::Result;

/// The three interchangeable persistence strategies. Resolved once at
/// startup by the backend factory; nothing above the factory branches on
/// the active variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Hosted,
    InMemory,
    ClientLocal,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Hosted => "hosted",
            BackendKind::InMemory => "in-memory",
            BackendKind::ClientLocal => "client-local",
        }
    }
}

/// Capability interface shared by every backend: one operation per
/// entity-lifecycle event. Implementations return canonical records and
/// keep their own ordering contracts: chats per user newest-first,
/// messages and stream ids per chat oldest-first.
///
/// Cascade deletes (chat -> messages/votes/streams, trailing messages ->
/// their votes, documents -> window suggestions) are each backend's
/// responsibility and must be atomic per call: a transaction on the hosted
/// backend, a single lock acquisition on the in-memory and client-local
/// ones.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn create_user(&self, user: UserRecord) -> Result<UserRecord>;
    async fn users_by_email(&self, email: &str) -> Result<Vec<UserRecord>>;
    /// Insert the user if absent, otherwise leave the existing row alone.
    async fn ensure_user(&self, user: UserRecord) -> Result<()>;

    async fn save_chat(&self, chat: ChatRecord) -> Result<ChatRecord>;
    async fn chat_by_id(&self, id: &str) -> Result<Option<ChatRecord>>;
    async fn chats_by_user(&self, user_id: &str) -> Result<Vec<ChatRecord>>;
    async fn delete_chat(&self, id: &str) -> Result<Option<ChatRecord>>;
    async fn update_chat_title(&self, chat_id: &str, title: &str) -> Result<()>;
    async fn update_chat_visibility(&self, chat_id: &str, visibility: Visibility) -> Result<()>;
    async fn update_chat_last_context(&self, chat_id: &str, context: Value) -> Result<()>;

    async fn save_messages(&self, messages: Vec<MessageRecord>) -> Result<Vec<MessageRecord>>;
    async fn messages_by_chat(&self, chat_id: &str) -> Result<Vec<MessageRecord>>;
    async fn message_by_id(&self, id: &str) -> Result<Option<MessageRecord>>;
    /// Delete messages of the chat with `created_at >= cutoff_ms` plus the
    /// votes referencing them. Returns the number of messages removed.
    async fn delete_messages_from(&self, chat_id: &str, cutoff_ms: i64) -> Result<usize>;
    /// Count of user-role messages across the user's chats since the cutoff.
    async fn user_message_count_since(&self, user_id: &str, since_ms: i64) -> Result<usize>;

    async fn upsert_vote(&self, vote: VoteRecord) -> Result<VoteRecord>;
    async fn votes_by_chat(&self, chat_id: &str) -> Result<Vec<VoteRecord>>;

    async fn save_document(&self, document: DocumentRecord) -> Result<DocumentRecord>;
    async fn documents_by_id(&self, id: &str) -> Result<Vec<DocumentRecord>>;
    /// Delete document versions with `created_at > cutoff_ms` together with
    /// suggestions in the same window. Returns the removed versions.
    async fn delete_documents_after(
        &self,
        id: &str,
        cutoff_ms: i64,
    ) -> Result<Vec<DocumentRecord>>;

    async fn save_suggestions(
        &self,
        suggestions: Vec<SuggestionRecord>,
    ) -> Result<Vec<SuggestionRecord>>;
    async fn suggestions_by_document(&self, document_id: &str) -> Result<Vec<SuggestionRecord>>;

    async fn create_stream(&self, stream: StreamRecord) -> Result<()>;
    async fn stream_ids_by_chat(&self, chat_id: &str) -> Result<Vec<String>>;
}
