use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
    Client,
};

use crate::error::{ParleyError, Result};
use crate::interfaces::models::{ChatMessage, Completion, CompletionEvent, LanguageModel, TokenUsage};

/// Hosted chat-completion model behind an OpenAI-compatible gateway.
#[derive(Clone)]
pub struct OpenAiModelProvider {
    model: String,
    client: Client<OpenAIConfig>,
}

impl OpenAiModelProvider {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| "meta-llama/llama-3.1-8b-instruct".to_string());
        let base_url = base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self {
            model,
            client: Client::with_config(config),
        }
    }

    fn build_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
        match message.role.as_str() {
            "system" => {
                let built = ChatCompletionRequestSystemMessageArgs::default()
                    .content(message.content.clone())
                    .build()
                    .map_err(|e| ParleyError::Runtime(e.to_string()))?;
                Ok(ChatCompletionRequestMessage::System(built))
            }
            "assistant" => {
                let built = ChatCompletionRequestAssistantMessageArgs::default()
                    .content(message.content.clone())
                    .build()
                    .map_err(|e| ParleyError::Runtime(e.to_string()))?;
                Ok(ChatCompletionRequestMessage::Assistant(built))
            }
            _ => {
                let built = ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Text(
                        message.content.clone(),
                    ))
                    .build()
                    .map_err(|e| ParleyError::Runtime(e.to_string()))?;
                Ok(ChatCompletionRequestMessage::User(built))
            }
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiModelProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion> {
        let request_messages: Vec<ChatCompletionRequestMessage> = messages
            .iter()
            .map(Self::build_message)
            .collect::<Result<_>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(request_messages)
            .build()
            .map_err(|e| ParleyError::Runtime(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| ParleyError::Api(e.to_string()))?;

        let text = response
            .choices
            .first()
            .ok_or_else(|| ParleyError::Api("no choices returned".to_string()))?
            .message
            .content
            .clone()
            .unwrap_or_default();

        let usage = response
            .usage
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(Completion { text, usage })
    }

    fn complete_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> BoxStream<'static, Result<CompletionEvent>> {
        let provider = self.clone();
        Box::pin(try_stream! {
            let completion = provider.complete(&messages).await?;
            if !completion.text.is_empty() {
                yield CompletionEvent::content(completion.text);
            }
            yield CompletionEvent::finish(completion.usage);
        })
    }
}
