//! OpenAI-compatible v1 API.
//!
//! ## Endpoints
//!
//! | Method | Path                   | Description                              |
//! |--------|------------------------|------------------------------------------|
//! | POST   | /v1/chat/completions   | Streamed, tool-orchestrated completion   |
//! | GET    | /v1/models             | Models offered by the upstream           |
//!
//! Completions are always streamed. The body is a sequence of
//! `data: <chat.completion.chunk>` lines ending in `data: [DONE]`; when a
//! run fails the body is cut off without the sentinel.

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use rago_core::message::Message;
use rago_engine::EngineRequest;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::SharedState;

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat/completions", post(chat_completions_handler))
        .route("/models", get(list_models_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatCompletionRequest {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    messages: Vec<ChatMessageDto>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatMessageDto {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

impl ChatMessageDto {
    fn into_message(self) -> Result<Message, String> {
        let content = self.content.unwrap_or_default();
        match self.role.as_str() {
            "system" => Ok(Message::system(content)),
            "user" => Ok(Message::user(content)),
            "assistant" => Ok(Message::assistant(content)),
            other => Err(format!("Unsupported message role '{other}'")),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn bad_request(error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

#[derive(Serialize)]
struct ModelList {
    object: &'static str,
    data: Vec<ModelEntry>,
}

#[derive(Serialize)]
struct ModelEntry {
    id: String,
    object: &'static str,
    owned_by: String,
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /v1/chat/completions`
async fn chat_completions_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatCompletionRequest>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    if payload.messages.is_empty() {
        return Err(bad_request("'messages' must contain at least one message"));
    }

    let messages = payload
        .messages
        .into_iter()
        .map(ChatMessageDto::into_message)
        .collect::<Result<Vec<_>, _>>()
        .map_err(bad_request)?;

    let model = payload
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.default_model.clone());

    info!(model = %model, messages = messages.len(), "Chat completion request");

    let request = EngineRequest {
        model,
        messages,
        temperature: payload
            .temperature
            .unwrap_or(state.config.default_temperature),
        max_tokens: payload
            .max_tokens
            .or(Some(state.config.default_max_tokens)),
    };

    // Dropping the body (client gone) cancels the run.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let frames = state.engine.spawn(request, cancel).into_stream().map(move |item| {
        let _held = &guard;
        item.inspect_err(|e| {
            error!(kind = e.kind(), error = %e, "Completion stream terminated");
        })
    });

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}

/// `GET /v1/models`
async fn list_models_handler(
    State(state): State<SharedState>,
) -> Result<Json<ModelList>, (StatusCode, Json<ErrorResponse>)> {
    let owned_by = state.provider.name().to_string();
    let mut ids = state.provider.list_models().await.map_err(|e| {
        warn!(error = %e, "Listing upstream models failed");
        (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: format!("Upstream error: {e}"),
            }),
        )
    })?;

    if ids.is_empty() {
        ids.push(state.config.default_model.clone());
    }

    Ok(Json(ModelList {
        object: "list",
        data: ids
            .into_iter()
            .map(|id| ModelEntry {
                id,
                object: "model",
                owned_by: owned_by.clone(),
            })
            .collect(),
    }))
}
