//! HTTP API gateway for rago.
//!
//! Exposes an OpenAI-compatible surface in front of the orchestration
//! engine: clients speak plain chat completions and get a streamed answer,
//! while tool calls run on this host in between.
//!
//! Built on Axum for high performance async HTTP.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::{Router, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use rago_config::AppConfig;
use rago_core::provider::Provider;
use rago_engine::{Engine, Summarizer};
use rago_providers::OpenAiCompatProvider;
use rago_tools::{LifxNetwork, LightNetwork};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub provider: Arc<dyn Provider>,
    pub engine: Engine,
}

impl GatewayState {
    /// Wire the action table and engine around one upstream provider.
    pub fn new(config: AppConfig, provider: Arc<dyn Provider>, network: Arc<dyn LightNetwork>) -> Self {
        let tools = Arc::new(rago_tools::action_table(&config, network));
        let summarizer = Summarizer::new(provider.clone())
            .with_temperature(config.default_temperature)
            .with_max_tokens(Some(config.default_max_tokens));
        let engine = Engine::from_config(provider.clone(), tools, &config.orchestration)
            .with_summarizer(summarizer);

        Self {
            config,
            provider,
            engine,
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router.
///
/// Layers applied:
/// - CORS limited to local origins
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            is_local_origin(origin)
        }))
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn is_local_origin(origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    let host = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
        .unwrap_or(origin);
    let host = host.split(':').next().unwrap_or(host);
    matches!(host, "localhost" | "127.0.0.1")
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    if !config.has_api_key() {
        warn!("No API key configured; upstream calls will be unauthenticated");
    }

    let provider: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::from_config(&config)?);
    let network: Arc<dyn LightNetwork> = Arc::new(LifxNetwork::from_config(&config.lights)?);
    let state = Arc::new(GatewayState::new(config, provider.clone(), network));

    let app = build_router(state);

    info!(addr = %addr, provider = provider.name(), "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{NoLights, StreamingMock, test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        build_router(test_state(
            Arc::new(StreamingMock::new(vec![])),
            Arc::new(NoLights),
        ))
    }

    #[tokio::test]
    async fn health_endpoint() {
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn v1_routes_are_nested() {
        let req = Request::builder()
            .uri("/v1/models")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let req = Request::builder()
            .uri("/models")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_body_rejected() {
        let big = "x".repeat(2 * 1024 * 1024);
        let body = serde_json::json!({"messages": [{"role": "user", "content": big}]});
        let req = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn local_origins_only() {
        assert!(is_local_origin(&HeaderValue::from_static("http://localhost:3000")));
        assert!(is_local_origin(&HeaderValue::from_static("http://127.0.0.1")));
        assert!(!is_local_origin(&HeaderValue::from_static("https://example.com")));
    }
}
