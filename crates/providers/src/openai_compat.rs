//! OpenAI-compatible provider implementation.
//!
//! Works with: Groq, OpenAI, OpenRouter, Ollama, vLLM, and any endpoint
//! that speaks `/v1/chat/completions` with server-sent events.
//!
//! Supports:
//! - Streaming chat completions (SSE), forwarding every delta as it arrives
//! - Tool use / function calling, forwarded as raw per-index fragments
//! - Model listing

use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use rago_core::error::ProviderError;
use rago_core::message::{Message, Role};
use rago_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        // No overall timeout: a streamed completion may legitimately run long.
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Build the provider described by the application config.
    pub fn from_config(config: &rago_config::AppConfig) -> Result<Self, ProviderError> {
        let name = provider_name_for(&config.api_url);
        Self::new(name, &config.api_url, config.api_key.clone().unwrap_or_default())
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!("auto");
        }

        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }

        body
    }
}

/// Derive a short provider name from its base URL.
fn provider_name_for(api_url: &str) -> &'static str {
    if api_url.contains("groq.com") {
        "groq"
    } else if api_url.contains("openai.com") {
        "openai"
    } else if api_url.contains("openrouter.ai") {
        "openrouter"
    } else if api_url.contains(":11434") {
        "ollama"
    } else {
        "custom"
    }
}

/// Map a non-success HTTP status to a provider error.
async fn status_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    match status {
        429 => ProviderError::RateLimited { retry_after_secs: 5 },
        401 | 403 => ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ),
        404 => ProviderError::ModelNotFound(response.text().await.unwrap_or_default()),
        _ => {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            ProviderError::ApiError {
                status_code: status,
                message: error_body,
            }
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self
            .authorized(self.client.post(&url))
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        // Capacity 1: the reader paces the upstream read loop.
        let (tx, rx) = mpsc::channel(1);
        let provider_name = self.name.clone();

        tokio::spawn(async move {
            let events = response.bytes_stream().eventsource();
            forward_events(events, tx, &provider_name, STREAM_IDLE_TIMEOUT).await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: ModelListResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(body.data.into_iter().map(|m| m.id).collect())
    }
}

// --- SSE decoding ---

/// Longest silence tolerated between two upstream events.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Decode SSE events and forward them as chunks until the stream finishes
/// or fails.
///
/// Event framing (and UTF-8 reassembly across network reads) is done by
/// `eventsource-stream`; only the `data` payload is interpreted here.
async fn forward_events<S, E>(
    events: S,
    tx: mpsc::Sender<Result<StreamChunk, ProviderError>>,
    provider_name: &str,
    idle_timeout: Duration,
) where
    S: Stream<Item = Result<Event, EventStreamError<E>>>,
    EventStreamError<E>: std::fmt::Display,
{
    let mut events = std::pin::pin!(events);
    let mut last_meta = ChunkMeta::default();

    loop {
        let event = match tokio::time::timeout(idle_timeout, events.next()).await {
            Ok(Some(Ok(event))) => event,
            Ok(Some(Err(e))) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(provider = %provider_name, "Upstream stream went idle");
                let _ = tx
                    .send(Err(ProviderError::Timeout(format!(
                        "no upstream event for {}s",
                        idle_timeout.as_secs()
                    ))))
                    .await;
                return;
            }
        };

        match decode_event(event.data.trim()) {
            SseEvent::Done => {
                let _ = tx
                    .send(Ok(StreamChunk {
                        meta: last_meta,
                        ..StreamChunk::finished()
                    }))
                    .await;
                return;
            }
            SseEvent::Chunk(chunk) => {
                last_meta = chunk.meta.clone();
                if tx.send(Ok(chunk)).await.is_err() {
                    return; // receiver dropped
                }
            }
            SseEvent::Failed(err) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
            SseEvent::Ignored(reason) => {
                trace!(
                    provider = %provider_name,
                    data = %event.data,
                    reason = %reason,
                    "Ignoring unparseable SSE chunk"
                );
            }
        }
    }

    // Stream ended without [DONE]; send the final chunk anyway
    let _ = tx
        .send(Ok(StreamChunk {
            meta: last_meta,
            ..StreamChunk::finished()
        }))
        .await;
}

enum SseEvent {
    Chunk(StreamChunk),
    Done,
    Failed(ProviderError),
    Ignored(String),
}

/// Decode one `data:` payload.
fn decode_event(data: &str) -> SseEvent {
    if data == "[DONE]" {
        return SseEvent::Done;
    }

    let parsed: StreamResponse = match serde_json::from_str(data) {
        Ok(p) => p,
        Err(e) => return SseEvent::Ignored(e.to_string()),
    };

    if let Some(err) = parsed.error {
        return SseEvent::Failed(ProviderError::StreamInterrupted(err.message));
    }

    let meta = ChunkMeta {
        id: parsed.id,
        created: parsed.created,
        model: parsed.model,
        system_fingerprint: parsed.system_fingerprint,
    };

    let Some(choice) = parsed.choices.into_iter().next() else {
        return SseEvent::Chunk(StreamChunk {
            meta,
            ..StreamChunk::default()
        });
    };

    let tool_calls = choice
        .delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            ToolCallDelta {
                index: tc.index,
                id: tc.id,
                name,
                arguments,
            }
        })
        .collect();

    SseEvent::Chunk(StreamChunk {
        meta,
        content: choice.delta.content.filter(|c| !c.is_empty()),
        tool_calls,
        finish_reason: choice.finish_reason,
        done: false,
    })
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    model: String,
    #[serde(default)]
    system_fingerprint: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta. Arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rago_core::message::MessageToolCall;

    fn chunk(data: &str) -> StreamChunk {
        match decode_event(data) {
            SseEvent::Chunk(c) => c,
            _ => panic!("expected chunk for {data}"),
        }
    }

    #[test]
    fn from_config_names_provider_by_url() {
        let mut config = rago_config::AppConfig::default();
        assert_eq!(OpenAiCompatProvider::from_config(&config).unwrap().name(), "groq");

        config.api_url = "http://10.0.0.5:8000/v1/".into();
        let provider = OpenAiCompatProvider::from_config(&config).unwrap();
        assert_eq!(provider.name(), "custom");
        assert_eq!(provider.base_url, "http://10.0.0.5:8000/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let mut msg = Message::assistant("");
        msg.tool_calls = vec![MessageToolCall {
            id: "call_1".into(),
            name: "executeCommand".into(),
            arguments: r#"{"command":"ls"}"#.into(),
        }];
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc.len(), 1);
        assert_eq!(tc[0].function.name, "executeCommand");
    }

    #[test]
    fn request_body_attaches_tools_only_when_present() {
        let mut request = ProviderRequest::new("llama3-70b-8192", vec![Message::user("hi")]);
        let body = OpenAiCompatProvider::request_body(&request);
        assert_eq!(body["stream"], true);
        assert!(body.get("tools").is_none());

        request.tools = vec![ToolDefinition {
            name: "controlLights".into(),
            description: "Control lights".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let body = OpenAiCompatProvider::request_body(&request);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "controlLights");
        assert_eq!(body["tool_choice"], "auto");
    }

    // --- SSE parsing tests ---

    /// Run raw upstream byte reads through the decoder and collect what
    /// the engine would receive.
    async fn forwarded(reads: Vec<Vec<u8>>) -> Vec<Result<StreamChunk, ProviderError>> {
        let (tx, mut rx) = mpsc::channel(16);
        let events = futures::stream::iter(reads.into_iter().map(Ok::<_, std::io::Error>))
            .eventsource();
        forward_events(events, tx, "test", Duration::from_secs(5)).await;

        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn payload_split_across_reads() {
        let items = forwarded(vec![
            b"data: {\"choices\":[{\"delta\":{\"con".to_vec(),
            b"tent\":\"Hi\"}}]}\n\n: keep-alive\n\ndata: [DONE]\n\n".to_vec(),
        ])
        .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content.as_deref(), Some("Hi"));
        assert!(items[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn multibyte_char_split_across_reads() {
        let payload = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n\n".as_bytes();
        let split = payload.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let items = forwarded(vec![payload[..split].to_vec(), payload[split..].to_vec()]).await;
        assert_eq!(items[0].as_ref().unwrap().content.as_deref(), Some("café"));
    }

    #[tokio::test]
    async fn missing_done_still_finishes() {
        let items = forwarded(vec![
            b"data: {\"id\":\"chatcmpl-9\",\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n".to_vec(),
        ])
        .await;
        assert_eq!(items.len(), 2);
        let last = items[1].as_ref().unwrap();
        assert!(last.done);
        assert_eq!(last.meta.id, "chatcmpl-9");
    }

    #[tokio::test]
    async fn inline_error_ends_stream() {
        let items = forwarded(vec![
            b"data: {\"error\":{\"message\":\"overloaded\"}}\n\ndata: [DONE]\n\n".to_vec(),
        ])
        .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(ProviderError::StreamInterrupted(m)) if m == "overloaded"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_upstream_times_out() {
        let (tx, mut rx) = mpsc::channel(4);
        let events = futures::stream::pending::<Result<Vec<u8>, std::io::Error>>().eventsource();
        forward_events(events, tx, "test", Duration::from_secs(30)).await;

        assert!(matches!(rx.recv().await, Some(Err(ProviderError::Timeout(_)))));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn decode_content_delta_with_meta() {
        let c = chunk(
            r#"{"id":"chatcmpl-1","created":1718000000,"model":"llama3-70b-8192","system_fingerprint":"fp_1","choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#,
        );
        assert_eq!(c.content.as_deref(), Some("Hello"));
        assert_eq!(c.meta.id, "chatcmpl-1");
        assert_eq!(c.meta.created, 1718000000);
        assert_eq!(c.meta.system_fingerprint.as_deref(), Some("fp_1"));
        assert!(!c.done);
    }

    #[test]
    fn decode_finish_chunk() {
        let c = chunk(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        assert_eq!(c.finish_reason.as_deref(), Some("stop"));
        assert!(c.content.is_none());
    }

    #[test]
    fn decode_empty_content_is_none() {
        let c = chunk(r#"{"choices":[{"delta":{"content":""}}]}"#);
        assert!(c.content.is_none());
    }

    #[test]
    fn decode_tool_call_fragments() {
        let first = chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"executeCommand","arguments":""}}]}}]}"#,
        );
        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.tool_calls[0].id.as_deref(), Some("call_abc"));
        assert_eq!(first.tool_calls[0].name.as_deref(), Some("executeCommand"));

        let second = chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"command\""}}]}}]}"#,
        );
        assert!(second.tool_calls[0].id.is_none());
        assert_eq!(second.tool_calls[0].arguments, "{\"command\"");
    }

    #[test]
    fn decode_parallel_tool_calls_keep_index() {
        let c = chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"x"}},{"index":1,"id":"b","function":{"name":"y"}}]}}]}"#,
        );
        assert_eq!(c.tool_calls.len(), 2);
        assert_eq!(c.tool_calls[1].index, 1);
    }

    #[test]
    fn decode_done_and_garbage() {
        assert!(matches!(decode_event("[DONE]"), SseEvent::Done));
        assert!(matches!(decode_event("not json"), SseEvent::Ignored(_)));
    }

    #[test]
    fn decode_inline_error_fails_stream() {
        match decode_event(r#"{"error":{"message":"model overloaded"}}"#) {
            SseEvent::Failed(ProviderError::StreamInterrupted(msg)) => {
                assert_eq!(msg, "model overloaded");
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn parse_model_list() {
        let data = r#"{"object":"list","data":[{"id":"llama3-70b-8192","object":"model"},{"id":"mixtral-8x7b-32768"}]}"#;
        let parsed: ModelListResponse = serde_json::from_str(data).unwrap();
        let ids: Vec<_> = parsed.data.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["llama3-70b-8192", "mixtral-8x7b-32768"]);
    }
}
