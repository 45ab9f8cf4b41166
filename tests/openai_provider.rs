use futures::StreamExt;
use httpmock::Method::POST;
use httpmock::MockServer;
use serde_json::json;

use parley::interfaces::models::{ChatMessage, LanguageModel};
use parley::providers::openai::OpenAiModelProvider;

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1,
        "model": "meta-llama/llama-3.1-8b-instruct",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": 10,
            "completion_tokens": 20,
            "total_tokens": 30
        }
    })
}

#[tokio::test]
async fn complete_returns_text_and_usage() {
    let server = MockServer::start_async().await;
    let chat_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(completion_body("hello"));
        })
        .await;

    let provider = OpenAiModelProvider::new("key".to_string(), None, Some(server.base_url()));
    let completion = provider
        .complete(&[
            ChatMessage::new("system", "be brief"),
            ChatMessage::new("user", "hi"),
        ])
        .await
        .unwrap();
    assert_eq!(completion.text, "hello");
    assert_eq!(completion.usage.input_tokens, 10);
    assert_eq!(completion.usage.output_tokens, 20);
    assert_eq!(completion.usage.total_tokens, 30);

    chat_mock.assert_hits(1);
}

#[tokio::test]
async fn complete_stream_yields_content_then_finish() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(completion_body("streamed"));
        })
        .await;

    let provider = OpenAiModelProvider::new("key".to_string(), None, Some(server.base_url()));
    let mut stream = provider.complete_stream(vec![ChatMessage::new("user", "hi")]);

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.event_type, "content");
    assert_eq!(first.delta.as_deref(), Some("streamed"));

    let last = stream.next().await.unwrap().unwrap();
    assert_eq!(last.event_type, "finish");
    assert_eq!(last.finish_reason.as_deref(), Some("stop"));
    assert_eq!(last.usage.unwrap().total_tokens, 30);

    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn choiceless_responses_map_to_the_api_kind() {
    // A well-formed 200 without choices; hard failure statuses would only
    // exercise the client's retry loop.
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 1,
                "model": "meta-llama/llama-3.1-8b-instruct",
                "choices": []
            }));
        })
        .await;

    let provider = OpenAiModelProvider::new("key".to_string(), None, Some(server.base_url()));
    let err = provider
        .complete(&[ChatMessage::new("user", "hi")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "bad_request:api");
    assert!(format!("{err}").contains("no choices"));
}
