use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ModelConfig;
use crate::error::{ParleyError, Result};
use crate::interfaces::models::{ChatMessage, LanguageModel};
use crate::providers::mock::CannedModelProvider;
use crate::providers::openai::OpenAiModelProvider;

pub const CHAT_MODEL: &str = "chat-model";
pub const REASONING_MODEL: &str = "chat-model-reasoning";
pub const TITLE_MODEL: &str = "title-model";
pub const ARTIFACT_MODEL: &str = "artifact-model";

const TITLE_SYSTEM_PROMPT: &str = "Generate a short title from the first message a user begins a \
conversation with. Keep it under 80 characters, summarize the message, and do not use quotes or \
colons.";

/// Which family of concrete models backs the logical slots. Chosen by the
/// caller at startup; the selector itself never inspects the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStrategy {
    Live,
    Test,
}

/// Maps logical slot names to concrete models. Resolved once; handlers ask
/// for slots by name and get a usable model or a `bad_request:api` error
/// when no credential was available at resolution time.
pub struct ModelSelector {
    slots: HashMap<String, Arc<dyn LanguageModel>>,
}

impl ModelSelector {
    pub fn resolve(
        strategy: ModelStrategy,
        config: &ModelConfig,
        user_api_key: Option<&str>,
    ) -> Self {
        let mut slots: HashMap<String, Arc<dyn LanguageModel>> = HashMap::new();
        match strategy {
            ModelStrategy::Test => {
                let canned: Arc<dyn LanguageModel> = Arc::new(CannedModelProvider::new());
                for slot in [CHAT_MODEL, REASONING_MODEL, TITLE_MODEL, ARTIFACT_MODEL] {
                    slots.insert(slot.to_string(), Arc::clone(&canned));
                }
            }
            ModelStrategy::Live => {
                let api_key = user_api_key
                    .map(str::to_string)
                    .filter(|k| !k.trim().is_empty())
                    .or_else(|| {
                        config
                            .api_key
                            .clone()
                            .filter(|k| !k.trim().is_empty())
                    });
                let Some(api_key) = api_key else {
                    // No credential anywhere. Leave every slot empty so
                    // lookups fail with a taxonomy error instead of a
                    // doomed upstream call.
                    return Self { slots };
                };
                let assignments = [
                    (CHAT_MODEL, config.chat_model.clone()),
                    (REASONING_MODEL, config.reasoning_model.clone()),
                    (TITLE_MODEL, config.title_model.clone()),
                    (ARTIFACT_MODEL, config.artifact_model.clone()),
                ];
                for (slot, model) in assignments {
                    let provider = OpenAiModelProvider::new(
                        api_key.clone(),
                        model,
                        config.base_url.clone(),
                    );
                    slots.insert(slot.to_string(), Arc::new(provider));
                }
            }
        }
        Self { slots }
    }

    pub fn language_model(&self, slot: &str) -> Result<Arc<dyn LanguageModel>> {
        self.slots.get(slot).cloned().ok_or_else(|| {
            ParleyError::Api(format!("No model available for slot {slot}"))
        })
    }

    pub fn is_usable(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn slot_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Asks the title model to summarize the opening user message. The reply
/// is clamped so a rambling model cannot overflow the sidebar.
pub async fn generate_title(selector: &ModelSelector, first_message: &str) -> Result<String> {
    let model = selector.language_model(TITLE_MODEL)?;
    let messages = vec![
        ChatMessage::new("system", TITLE_SYSTEM_PROMPT),
        ChatMessage::new("user", first_message),
    ];
    let completion = model.complete(&messages).await?;
    let title = completion.text.trim();
    if title.chars().count() > 80 {
        Ok(title.chars().take(80).collect())
    } else {
        Ok(title.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_fills_every_slot() {
        let selector = ModelSelector::resolve(ModelStrategy::Test, &ModelConfig::default(), None);
        assert!(selector.is_usable());
        for slot in [CHAT_MODEL, REASONING_MODEL, TITLE_MODEL, ARTIFACT_MODEL] {
            assert!(selector.language_model(slot).is_ok());
        }
    }

    #[test]
    fn live_strategy_without_credential_is_empty() {
        let selector = ModelSelector::resolve(ModelStrategy::Live, &ModelConfig::default(), None);
        assert!(!selector.is_usable());
        let err = selector.language_model(CHAT_MODEL).err().unwrap();
        assert_eq!(err.kind(), "bad_request:api");
    }

    #[test]
    fn user_key_enables_live_slots() {
        let selector = ModelSelector::resolve(
            ModelStrategy::Live,
            &ModelConfig::default(),
            Some("sk-user"),
        );
        assert!(selector.is_usable());
        assert_eq!(selector.slot_names().len(), 4);
    }
}
