//! OpenAI-compatible streaming chat completions
//!
//! Posts to `{api_base}/chat/completions` with `stream: true` and reads the
//! server-sent event stream. Each `data:` event carries a JSON chunk whose
//! `choices[0].delta.content` is the next piece of text; `data: [DONE]`
//! ends the stream.

use super::{CompletionRequest, CompletionService};
use crate::config::CompletionConfig;
use crate::error::{LampstandError, Result};
use crate::sessions::{ChatMessage, Role};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Completion service backed by an OpenAI-compatible HTTP API
#[derive(Debug, Clone)]
pub struct OpenAiCompletion {
    client: Client,
    config: CompletionConfig,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamEvent {
    /// Next piece of reply text
    Delta(String),
    /// The model finished its reply
    Finished,
    /// Terminal `[DONE]` marker
    Done,
    /// Comment, keep-alive or role-only chunk
    Skip,
}

impl OpenAiCompletion {
    /// Creates a client for the configured endpoint
    ///
    /// # Arguments
    ///
    /// * `config` - Endpoint, model and timeout settings
    /// * `api_key` - Bearer token, if the endpoint needs one
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(config: CompletionConfig, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("lampstand/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                LampstandError::CompletionFailed(format!("Failed to create HTTP client: {}", e))
            })?;

        tracing::info!(
            "Initialized completion service: api_base={}, model={}",
            config.api_base,
            config.model
        );

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        )
    }

    fn build_body<'a>(&'a self, request: &'a CompletionRequest) -> ApiRequest<'a> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        if !request.system_prompt.is_empty() {
            messages.push(ApiMessage {
                role: "system",
                content: &request.system_prompt,
            });
        }
        messages.extend(
            request
                .history
                .iter()
                .filter(|m| !m.is_placeholder())
                .map(api_message),
        );
        messages.push(ApiMessage {
            role: "user",
            content: &request.prompt,
        });

        ApiRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            stream: true,
        }
    }
}

fn api_message(message: &ChatMessage) -> ApiMessage<'_> {
    ApiMessage {
        role: match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        },
        content: &message.content,
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(
        &self,
        request: &CompletionRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String> {
        let body = self.build_body(request);
        tracing::debug!(
            model = %self.config.model,
            history = request.history.len(),
            "Sending completion request"
        );

        let mut builder = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!("Completion request failed: {}", e);
            LampstandError::CompletionFailed(format!("request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            tracing::error!("Completion endpoint returned {}: {}", status, detail);
            return Err(LampstandError::CompletionFailed(format!("{}: {}", status, detail)).into());
        }

        read_stream(response.bytes_stream(), on_chunk).await
    }
}

/// Drain an SSE body, forwarding text deltas to `on_chunk`
pub(crate) async fn read_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
) -> Result<String> {
    // Raw bytes: a multi-byte character may straddle two network chunks.
    let mut buffer: Vec<u8> = Vec::new();
    let mut full = String::new();
    let mut finished = false;

    tokio::pin!(byte_stream);

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(|e| {
            tracing::error!("Completion stream interrupted: {}", e);
            LampstandError::CompletionFailed(format!("stream interrupted: {}", e))
        })?;
        buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = buffer.drain(..pos + 2).collect();
            match parse_event(&String::from_utf8_lossy(&block))? {
                StreamEvent::Delta(text) => {
                    on_chunk(&text);
                    full.push_str(&text);
                }
                StreamEvent::Finished => finished = true,
                StreamEvent::Done => return finish(full),
                StreamEvent::Skip => {}
            }
        }
    }

    // Some servers close the body after the last chunk without `[DONE]`.
    if finished {
        return finish(full);
    }
    Err(LampstandError::CompletionFailed("stream ended before the reply finished".into()).into())
}

fn finish(full: String) -> Result<String> {
    if full.trim().is_empty() {
        return Err(LampstandError::CompletionFailed("empty reply".into()).into());
    }
    Ok(full)
}

/// Decode one event block (text between blank lines)
pub(crate) fn parse_event(block: &str) -> Result<StreamEvent> {
    let data: Vec<&str> = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .collect();
    if data.is_empty() {
        return Ok(StreamEvent::Skip);
    }
    let data = data.join("\n");

    if data == "[DONE]" {
        return Ok(StreamEvent::Done);
    }

    if let Ok(err) = serde_json::from_str::<ErrorResponse>(&data) {
        tracing::error!("Completion stream reported an error: {}", err.error.message);
        return Err(LampstandError::CompletionFailed(err.error.message).into());
    }

    let chunk: ChunkResponse = serde_json::from_str(&data).map_err(|e| {
        LampstandError::CompletionFailed(format!("malformed stream chunk: {}", e))
    })?;

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(StreamEvent::Skip);
    };
    match (choice.delta.content, choice.finish_reason) {
        (Some(text), _) if !text.is_empty() => Ok(StreamEvent::Delta(text)),
        (_, Some(_)) => Ok(StreamEvent::Finished),
        _ => Ok(StreamEvent::Skip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;

    fn chunks(parts: &[&str]) -> impl Stream<Item = reqwest::Result<Bytes>> {
        let items: Vec<reqwest::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        futures::stream::iter(items)
    }

    #[test]
    fn test_parse_event_variants() {
        assert_eq!(
            parse_event("data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n").unwrap(),
            StreamEvent::Delta("Hi".to_string())
        );
        assert_eq!(
            parse_event("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n")
                .unwrap(),
            StreamEvent::Finished
        );
        assert_eq!(parse_event("data: [DONE]\n\n").unwrap(), StreamEvent::Done);
        assert_eq!(parse_event(": keep-alive\n\n").unwrap(), StreamEvent::Skip);
        assert_eq!(
            parse_event("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n")
                .unwrap(),
            StreamEvent::Skip
        );
    }

    #[test]
    fn test_parse_event_error_payload() {
        let err = parse_event("data: {\"error\":{\"message\":\"rate limited\"}}\n\n").unwrap_err();
        assert!(matches!(
            kind_of(&err),
            Some(LampstandError::CompletionFailed(m)) if m == "rate limited"
        ));
    }

    #[tokio::test]
    async fn test_read_stream_handles_split_events() {
        let stream = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"In the \"}}]}\n",
            "\ndata: {\"choices\":[{\"delta\":{\"content\":\"beginning\"}}]}\r\n\r\n",
            "data: [DONE]\n\n",
        ]);
        let mut seen = Vec::new();
        let text = read_stream(stream, &mut |c: &str| seen.push(c.to_string()))
            .await
            .unwrap();
        assert_eq!(text, "In the beginning");
        assert_eq!(seen, vec!["In the ", "beginning"]);
    }

    #[tokio::test]
    async fn test_read_stream_keeps_multibyte_char_split_across_chunks() {
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"Gênesis\"}}]}\n\n";
        let bytes = event.as_bytes();
        // Cut between the two bytes of 'ê' (0xC3 0xAA).
        let cut = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let items: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::copy_from_slice(&bytes[..cut])),
            Ok(Bytes::copy_from_slice(&bytes[cut..])),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ];

        let mut seen = Vec::new();
        let text = read_stream(futures::stream::iter(items), &mut |c: &str| {
            seen.push(c.to_string())
        })
        .await
        .unwrap();
        assert_eq!(text, "Gênesis");
        assert_eq!(seen, vec!["Gênesis"]);
    }

    #[tokio::test]
    async fn test_read_stream_without_done_after_finish_reason() {
        let stream = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Amen\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        ]);
        let text = read_stream(stream, &mut |_: &str| {}).await.unwrap();
        assert_eq!(text, "Amen");
    }

    #[tokio::test]
    async fn test_read_stream_truncated_is_failure() {
        let stream = chunks(&["data: {\"choices\":[{\"delta\":{\"content\":\"In the\"}}]}\n\n"]);
        let err = read_stream(stream, &mut |_: &str| {}).await.unwrap_err();
        assert!(matches!(
            kind_of(&err),
            Some(LampstandError::CompletionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_read_stream_empty_reply_is_failure() {
        let stream = chunks(&["data: [DONE]\n\n"]);
        assert!(read_stream(stream, &mut |_: &str| {}).await.is_err());
    }

    #[test]
    fn test_build_body_skips_placeholder_and_adds_system() {
        let service = OpenAiCompletion::new(CompletionConfig::default(), None).unwrap();
        let request = CompletionRequest {
            system_prompt: "You are a study companion.".to_string(),
            history: vec![
                ChatMessage::user("q1"),
                ChatMessage::assistant("a1"),
                ChatMessage::assistant(""),
            ],
            prompt: "q2".to_string(),
        };

        let body = serde_json::to_value(service.build_body(&request)).unwrap();
        let roles: Vec<_> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(body["stream"], serde_json::json!(true));
        assert_eq!(body["model"], serde_json::json!("gpt-4o-mini"));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = CompletionConfig {
            api_base: "http://localhost:8080/v1/".to_string(),
            ..Default::default()
        };
        let service = OpenAiCompletion::new(config, None).unwrap();
        assert_eq!(service.endpoint(), "http://localhost:8080/v1/chat/completions");
    }
}
