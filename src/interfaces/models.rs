use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// One event of a token-delta stream. The stream is terminated by a single
/// `finish` event carrying the finish reason and token-usage counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub event_type: String,
    pub delta: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl CompletionEvent {
    pub fn content(delta: impl Into<String>) -> Self {
        Self {
            event_type: "content".to_string(),
            delta: Some(delta.into()),
            finish_reason: None,
            usage: None,
        }
    }

    pub fn finish(usage: TokenUsage) -> Self {
        Self {
            event_type: "finish".to_string(),
            delta: None,
            finish_reason: Some("stop".to_string()),
            usage: Some(usage),
        }
    }
}

/// A concrete hosted model behind one logical slot of the selector.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion>;

    fn complete_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> BoxStream<'static, Result<CompletionEvent>>;
}
