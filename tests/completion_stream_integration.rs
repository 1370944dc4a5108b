//! Streaming completion client against a mock OpenAI-compatible endpoint

use lampstand::completion::{CompletionRequest, CompletionService, OpenAiCompletion};
use lampstand::config::CompletionConfig;
use lampstand::error::{kind_of, LampstandError};
use lampstand::sessions::ChatMessage;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> OpenAiCompletion {
    let config = CompletionConfig {
        api_base: format!("{}/v1/", server.uri()),
        model: "test-model".to_string(),
        ..CompletionConfig::default()
    };
    OpenAiCompletion::new(config, Some("sk-test".to_string())).unwrap()
}

fn request() -> CompletionRequest {
    CompletionRequest {
        system_prompt: "You are a Bible study companion.".to_string(),
        history: vec![
            ChatMessage::user("Quem foi Rute?"),
            ChatMessage::assistant("Uma moabita."),
        ],
        prompt: "E Noemi?".to_string(),
    }
}

fn sse(events: &[&str]) -> Vec<u8> {
    events
        .iter()
        .map(|e| format!("data: {}\n\n", e))
        .collect::<String>()
        .into_bytes()
}

#[tokio::test]
async fn test_streams_deltas_in_order() {
    let server = MockServer::start().await;
    let body = sse(&[
        r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"{"choices":[{"delta":{"content":"Sogra "}}]}"#,
        r#"{"choices":[{"delta":{"content":"de Rute."}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        "[DONE]",
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-model",
            "stream": true,
            "messages": [
                {"role": "system", "content": "You are a Bible study companion."},
                {"role": "user", "content": "Quem foi Rute?"},
                {"role": "assistant", "content": "Uma moabita."},
                {"role": "user", "content": "E Noemi?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let mut chunks = Vec::new();
    let reply = client(&server)
        .complete(&request(), &mut |c: &str| chunks.push(c.to_string()))
        .await
        .unwrap();

    assert_eq!(reply, "Sogra de Rute.");
    assert_eq!(chunks, vec!["Sogra ", "de Rute."]);
}

#[tokio::test]
async fn test_http_error_maps_to_completion_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": {"message": "Rate limit reached"}
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .complete(&request(), &mut |_: &str| {})
        .await
        .unwrap_err();
    match kind_of(&err) {
        Some(LampstandError::CompletionFailed(msg)) => assert!(msg.contains("Rate limit reached")),
        other => panic!("expected CompletionFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_error_payload_mid_stream_fails() {
    let server = MockServer::start().await;
    let body = sse(&[
        r#"{"choices":[{"delta":{"content":"Partial"}}]}"#,
        r#"{"error":{"message":"model overloaded"}}"#,
    ]);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let mut chunks = Vec::new();
    let err = client(&server)
        .complete(&request(), &mut |c: &str| chunks.push(c.to_string()))
        .await
        .unwrap_err();
    assert_eq!(chunks, vec!["Partial"]);
    assert!(err.to_string().contains("model overloaded"));
}

#[tokio::test]
async fn test_truncated_stream_fails() {
    let server = MockServer::start().await;
    let body = sse(&[r#"{"choices":[{"delta":{"content":"Cut"}}]}"#]);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let err = client(&server)
        .complete(&request(), &mut |_: &str| {})
        .await
        .unwrap_err();
    assert!(matches!(
        kind_of(&err),
        Some(LampstandError::CompletionFailed(_))
    ));
}
