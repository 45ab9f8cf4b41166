use parley::config::ModelConfig;
use parley::services::models::{
    self, ModelSelector, ModelStrategy, CHAT_MODEL, REASONING_MODEL, TITLE_MODEL,
};

#[tokio::test]
async fn canned_models_answer_deterministically() {
    use parley::interfaces::models::ChatMessage;

    let selector = ModelSelector::resolve(ModelStrategy::Test, &ModelConfig::default(), None);
    let model = selector.language_model(CHAT_MODEL).unwrap();

    let first = model
        .complete(&[ChatMessage::new("user", "Why is the sky blue?")])
        .await
        .unwrap();
    let second = model
        .complete(&[ChatMessage::new("user", "Why is the sky blue?")])
        .await
        .unwrap();
    assert_eq!(first.text, second.text);
    assert_eq!(first.text, "It's just blue duh!");
    assert_eq!(first.usage.input_tokens, 10);
}

#[tokio::test]
async fn title_generation_uses_the_title_slot() {
    let selector = ModelSelector::resolve(ModelStrategy::Test, &ModelConfig::default(), None);
    assert!(selector.language_model(TITLE_MODEL).is_ok());

    let title = models::generate_title(&selector, "What are the advantages of using Next.js?")
        .await
        .unwrap();
    assert_eq!(title, "With Next.js, you can ship fast!");
    assert!(title.len() <= 80);
}

#[tokio::test]
async fn missing_credential_fails_at_lookup_not_at_call() {
    let selector = ModelSelector::resolve(ModelStrategy::Live, &ModelConfig::default(), None);
    for slot in [CHAT_MODEL, REASONING_MODEL, TITLE_MODEL] {
        let err = selector.language_model(slot).err().unwrap();
        assert_eq!(err.kind(), "bad_request:api");
    }

    let err = models::generate_title(&selector, "anything").await.unwrap_err();
    assert_eq!(err.kind(), "bad_request:api");
}

#[tokio::test]
async fn server_credential_backstops_the_user_key() {
    let config = ModelConfig {
        api_key: Some("sk-server".to_string()),
        ..ModelConfig::default()
    };
    let selector = ModelSelector::resolve(ModelStrategy::Live, &config, None);
    assert!(selector.is_usable());

    // A blank user key must not shadow the configured one.
    let selector = ModelSelector::resolve(ModelStrategy::Live, &config, Some("   "));
    assert!(selector.is_usable());
}
