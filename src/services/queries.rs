use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domains::records::{
    now_ms, ChatRecord, DocumentRecord, MessageRecord, StreamRecord, SuggestionRecord, UserRecord,
    Visibility, VoteRecord, VoteType,
};
use crate::error::{ParleyError, Result};
use crate::interfaces::storage::{BackendKind, StorageBackend};

const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;

/// One page of a user's chat history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPage {
    pub chats: Vec<ChatRecord>,
    pub has_more: bool,
}

/// Cursor window for [`QueryService::chats_by_user`]. `starting_after`
/// selects chats created after the cursor (newer), `ending_before` chats
/// created before it (older); at most one may be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPageRequest {
    pub limit: usize,
    pub starting_after: Option<String>,
    pub ending_before: Option<String>,
}

/// Input for saving a new chat shell before its first messages land.
#[derive(Debug, Clone)]
pub struct NewChat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub visibility: Visibility,
}

pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Single entry point for every read and write against the active
/// backend. Callers never see backend-specific failures: every operation
/// runs under a timeout and folds unexpected errors into the stable
/// taxonomy with an operation-specific message.
pub struct QueryService {
    backend: Arc<dyn StorageBackend>,
    timeout: Duration,
}

impl QueryService {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_timeout(backend, Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS))
    }

    pub fn with_timeout(backend: Arc<dyn StorageBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    async fn call<T, F>(&self, failure: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|err| classify(failure, err)),
            Err(_) => Err(ParleyError::Timeout(failure.to_string())),
        }
    }

    pub async fn create_user(&self, email: &str, password: &str) -> Result<UserRecord> {
        require("email", email)?;
        let user = UserRecord {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password: Some(hash_password(password)),
        };
        self.call("Failed to create user", self.backend.create_user(user))
            .await
    }

    /// Guest accounts get a synthetic email and a throwaway credential;
    /// they are real rows so their chats hang off a user id like anyone
    /// else's.
    pub async fn create_guest_user(&self) -> Result<UserRecord> {
        let user = UserRecord {
            id: Uuid::new_v4().to_string(),
            email: format!("guest-{}", now_ms()),
            password: Some(hash_password(&Uuid::new_v4().to_string())),
        };
        self.call("Failed to create guest user", self.backend.create_user(user))
            .await
    }

    pub async fn users_by_email(&self, email: &str) -> Result<Vec<UserRecord>> {
        require("email", email)?;
        self.call(
            "Failed to get user by email",
            self.backend.users_by_email(email),
        )
        .await
    }

    pub async fn save_chat(&self, chat: NewChat) -> Result<ChatRecord> {
        require("id", &chat.id)?;
        require("userId", &chat.user_id)?;
        // The owner row may not exist yet on backends that never saw a
        // sign-up, so it is created on the fly with a placeholder email.
        let placeholder = UserRecord {
            id: chat.user_id.clone(),
            email: format!("{}@placeholder.local", chat.user_id),
            password: None,
        };
        self.call("Failed to save chat", self.backend.ensure_user(placeholder))
            .await?;
        let record = ChatRecord {
            id: chat.id,
            user_id: chat.user_id,
            title: chat.title,
            visibility: chat.visibility,
            created_at: now_ms(),
            last_context: None,
        };
        self.call("Failed to save chat", self.backend.save_chat(record))
            .await
    }

    pub async fn chat_by_id(&self, id: &str) -> Result<Option<ChatRecord>> {
        require("id", id)?;
        self.call("Failed to get chat by id", self.backend.chat_by_id(id))
            .await
    }

    pub async fn chats_by_user(
        &self,
        user_id: &str,
        request: ChatPageRequest,
    ) -> Result<ChatPage> {
        require("userId", user_id)?;
        if request.starting_after.is_some() && request.ending_before.is_some() {
            return Err(ParleyError::Api(
                "Only one of startingAfter or endingBefore can be provided".to_string(),
            ));
        }

        let all = self
            .call(
                "Failed to get chats by user id",
                self.backend.chats_by_user(user_id),
            )
            .await?;

        let filtered: Vec<ChatRecord> = if let Some(cursor_id) = &request.starting_after {
            let cursor = self.cursor_timestamp(cursor_id).await?;
            all.into_iter()
                .filter(|c| c.created_at > cursor)
                .collect()
        } else if let Some(cursor_id) = &request.ending_before {
            let cursor = self.cursor_timestamp(cursor_id).await?;
            all.into_iter()
                .filter(|c| c.created_at < cursor)
                .collect()
        } else {
            all
        };

        let has_more = filtered.len() > request.limit;
        let mut chats = filtered;
        chats.truncate(request.limit);
        Ok(ChatPage { chats, has_more })
    }

    /// Cursors are plain chat ids and resolve against the whole chat table,
    /// not just the requesting user's chats.
    async fn cursor_timestamp(&self, cursor_id: &str) -> Result<i64> {
        let chat = self
            .call(
                "Failed to get chat by id",
                self.backend.chat_by_id(cursor_id),
            )
            .await?;
        chat.map(|c| c.created_at)
            .ok_or_else(|| ParleyError::NotFound(format!("Chat with id {cursor_id} not found")))
    }

    pub async fn delete_chat(&self, id: &str) -> Result<ChatRecord> {
        require("id", id)?;
        let removed = self
            .call("Failed to delete chat by id", self.backend.delete_chat(id))
            .await?;
        removed.ok_or_else(|| ParleyError::NotFound(format!("Chat with id {id} not found")))
    }

    pub async fn update_chat_title(&self, chat_id: &str, title: &str) -> Result<()> {
        require("chatId", chat_id)?;
        self.call(
            "Failed to update chat title",
            self.backend.update_chat_title(chat_id, title),
        )
        .await
    }

    pub async fn update_chat_visibility(
        &self,
        chat_id: &str,
        visibility: Visibility,
    ) -> Result<()> {
        require("chatId", chat_id)?;
        self.call(
            "Failed to update chat visibility by id",
            self.backend.update_chat_visibility(chat_id, visibility),
        )
        .await
    }

    pub async fn update_chat_last_context(&self, chat_id: &str, context: Value) -> Result<()> {
        require("chatId", chat_id)?;
        self.call(
            "Failed to update chat last context",
            self.backend.update_chat_last_context(chat_id, context),
        )
        .await
    }

    pub async fn save_messages(&self, messages: Vec<MessageRecord>) -> Result<Vec<MessageRecord>> {
        self.call("Failed to save messages", self.backend.save_messages(messages))
            .await
    }

    pub async fn messages_by_chat(&self, chat_id: &str) -> Result<Vec<MessageRecord>> {
        require("chatId", chat_id)?;
        self.call(
            "Failed to get messages by chat id",
            self.backend.messages_by_chat(chat_id),
        )
        .await
    }

    pub async fn message_by_id(&self, id: &str) -> Result<Option<MessageRecord>> {
        require("id", id)?;
        self.call(
            "Failed to get message by id",
            self.backend.message_by_id(id),
        )
        .await
    }

    /// Removes the anchor message and everything after it in the chat,
    /// votes included. Used when a turn is retried.
    pub async fn delete_trailing_messages(&self, message_id: &str) -> Result<usize> {
        require("id", message_id)?;
        let anchor = self
            .call(
                "Failed to get message by id",
                self.backend.message_by_id(message_id),
            )
            .await?
            .ok_or_else(|| {
                ParleyError::NotFound(format!("Message with id {message_id} not found"))
            })?;
        self.call(
            "Failed to delete messages by chat id after timestamp",
            self.backend
                .delete_messages_from(&anchor.chat_id, anchor.created_at),
        )
        .await
    }

    pub async fn user_message_count_since(&self, user_id: &str, hours: u64) -> Result<usize> {
        require("userId", user_id)?;
        let since_ms = now_ms() - (hours as i64) * 60 * 60 * 1000;
        self.call(
            "Failed to get message count by user id",
            self.backend.user_message_count_since(user_id, since_ms),
        )
        .await
    }

    pub async fn vote_message(
        &self,
        chat_id: &str,
        message_id: &str,
        vote: VoteType,
    ) -> Result<VoteRecord> {
        require("chatId", chat_id)?;
        require("messageId", message_id)?;
        let record = VoteRecord {
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
            is_upvoted: vote == VoteType::Up,
        };
        self.call("Failed to vote message", self.backend.upsert_vote(record))
            .await
    }

    pub async fn votes_by_chat(&self, chat_id: &str) -> Result<Vec<VoteRecord>> {
        require("chatId", chat_id)?;
        self.call(
            "Failed to get votes by chat id",
            self.backend.votes_by_chat(chat_id),
        )
        .await
    }

    pub async fn save_document(&self, document: DocumentRecord) -> Result<DocumentRecord> {
        require("id", &document.id)?;
        self.call("Failed to save document", self.backend.save_document(document))
            .await
    }

    pub async fn documents_by_id(&self, id: &str) -> Result<Vec<DocumentRecord>> {
        require("id", id)?;
        self.call(
            "Failed to get documents by id",
            self.backend.documents_by_id(id),
        )
        .await
    }

    pub async fn delete_documents_after(
        &self,
        id: &str,
        cutoff_ms: i64,
    ) -> Result<Vec<DocumentRecord>> {
        require("id", id)?;
        self.call(
            "Failed to delete documents by id after timestamp",
            self.backend.delete_documents_after(id, cutoff_ms),
        )
        .await
    }

    pub async fn save_suggestions(
        &self,
        suggestions: Vec<SuggestionRecord>,
    ) -> Result<Vec<SuggestionRecord>> {
        self.call(
            "Failed to save suggestions",
            self.backend.save_suggestions(suggestions),
        )
        .await
    }

    pub async fn suggestions_by_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<SuggestionRecord>> {
        require("documentId", document_id)?;
        self.call(
            "Failed to get suggestions by document id",
            self.backend.suggestions_by_document(document_id),
        )
        .await
    }

    pub async fn create_stream(&self, stream_id: &str, chat_id: &str) -> Result<()> {
        require("streamId", stream_id)?;
        require("chatId", chat_id)?;
        let record = StreamRecord {
            id: stream_id.to_string(),
            chat_id: chat_id.to_string(),
            created_at: now_ms(),
        };
        self.call("Failed to create stream id", self.backend.create_stream(record))
            .await
    }

    pub async fn stream_ids_by_chat(&self, chat_id: &str) -> Result<Vec<String>> {
        require("chatId", chat_id)?;
        self.call(
            "Failed to get stream ids by chat id",
            self.backend.stream_ids_by_chat(chat_id),
        )
        .await
    }
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ParleyError::Api(format!("Parameter {name} is required")));
    }
    Ok(())
}

fn classify(failure: &'static str, err: ParleyError) -> ParleyError {
    match err {
        ParleyError::NotFound(_)
        | ParleyError::Timeout(_)
        | ParleyError::Unauthorized(_)
        | ParleyError::Forbidden(_)
        | ParleyError::RateLimited(_)
        | ParleyError::Api(_) => err,
        other => {
            tracing::debug!(cause = %other, "storage operation failed");
            ParleyError::Database(failure.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_is_hex_sha256() {
        let hash = hash_password("secret");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_password("secret"));
        assert_ne!(hash, hash_password("other"));
    }

    #[test]
    fn classify_keeps_taxonomy_errors() {
        let err = classify("Failed to save chat", ParleyError::NotFound("gone".into()));
        assert_eq!(err.kind(), "not_found:database");

        let err = classify("Failed to save chat", ParleyError::Runtime("io".into()));
        assert_eq!(err.kind(), "bad_request:database");
        assert!(format!("{err}").contains("Failed to save chat"));
    }
}
