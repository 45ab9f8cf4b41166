use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::interfaces::models::{ChatMessage, Completion, CompletionEvent, LanguageModel, TokenUsage};

/// Deterministic model used by the test strategy. Replies come from a
/// small canned table keyed on the last user turn, so assertions never
/// depend on a live gateway.
#[derive(Debug, Clone, Default)]
pub struct CannedModelProvider;

impl CannedModelProvider {
    pub fn new() -> Self {
        Self
    }

    fn canned_usage() -> TokenUsage {
        TokenUsage {
            input_tokens: 10,
            output_tokens: 20,
            total_tokens: 30,
        }
    }

    fn reply_for(messages: &[ChatMessage]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        if last_user.contains("Next.js") || last_user.contains("advantages") {
            "With Next.js, you can ship fast!".to_string()
        } else if last_user.contains("blue") {
            "It's just blue duh!".to_string()
        } else {
            "It's just green duh!".to_string()
        }
    }
}

#[async_trait]
impl LanguageModel for CannedModelProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion> {
        Ok(Completion {
            text: Self::reply_for(messages),
            usage: Self::canned_usage(),
        })
    }

    fn complete_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> BoxStream<'static, Result<CompletionEvent>> {
        Box::pin(try_stream! {
            let text = Self::reply_for(&messages);
            yield CompletionEvent::content(text);
            yield CompletionEvent::finish(Self::canned_usage());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn canned_replies_match_known_prompts() {
        let model = CannedModelProvider::new();

        let next = model
            .complete(&[ChatMessage::new(
                "user",
                "What are the advantages of using Next.js?",
            )])
            .await
            .unwrap();
        assert_eq!(next.text, "With Next.js, you can ship fast!");
        assert_eq!(next.usage.total_tokens, 30);

        let sky = model
            .complete(&[ChatMessage::new("user", "Why is the sky blue?")])
            .await
            .unwrap();
        assert_eq!(sky.text, "It's just blue duh!");

        let grass = model
            .complete(&[ChatMessage::new("user", "Why is grass the colour it is?")])
            .await
            .unwrap();
        assert_eq!(grass.text, "It's just green duh!");
    }
}
