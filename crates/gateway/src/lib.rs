//! HTTP gateway for sagebot.
//!
//! Exposes the chat API (streamed turns, message history, visitor
//! sessions) and a health check.
//!
//! Built on Axum.

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    response::Json,
    routing::{get, post},
};
use sagebot_agent::TurnEngine;
use sagebot_config::{AppConfig, StorageBackend};
use sagebot_core::action::ActionRegistry;
use sagebot_core::knowledge::KnowledgeBase;
use sagebot_core::page::PageFetcher;
use sagebot_core::provider::Provider;
use sagebot_core::store::{MessageStore, SessionStore};
use sagebot_memory::{InMemoryStore, StaticKnowledgeBase, VectorKnowledgeBase};
use sagebot_providers::GeminiProvider;
use sagebot_tools::HttpPageFetcher;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub engine: Arc<TurnEngine>,
    pub messages: Arc<dyn MessageStore>,
    pub sessions: Arc<dyn SessionStore>,
    /// Prior messages loaded into each turn.
    pub history_limit: usize,
}

pub type SharedState = Arc<GatewayState>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Build the Axum router with all gateway routes.
///
/// An empty `allowed_origins` allows any origin.
pub fn build_router(state: SharedState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/stream", post(api::stream_handler))
        .route("/api/messages", get(api::messages_handler))
        .route("/api/session", post(api::session_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors_layer(allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

/// The model provider described by the config.
pub fn build_provider(config: &AppConfig) -> Result<Arc<dyn Provider>, BoxError> {
    let api_key = config
        .api_key
        .clone()
        .ok_or("No API key configured. Set SAGEBOT_API_KEY or GEMINI_API_KEY, or run `sagebot init`.")?;
    Ok(Arc::new(GeminiProvider::new(&config.api_base_url, api_key)?))
}

/// The knowledge base: the configured index, or an empty one.
pub fn build_knowledge(
    config: &AppConfig,
    provider: Arc<dyn Provider>,
) -> Result<Arc<dyn KnowledgeBase>, BoxError> {
    match &config.knowledge.index_path {
        Some(path) => {
            let kb = VectorKnowledgeBase::load(
                provider,
                &config.knowledge.embedding_model,
                Path::new(path),
            )?
            .with_min_score(config.knowledge.min_score);
            Ok(Arc::new(kb))
        }
        None => {
            info!("No knowledge index configured, retrieval returns no passages");
            Ok(Arc::new(StaticKnowledgeBase::empty()))
        }
    }
}

/// Wire provider, knowledge base, page fetcher and actions into an engine.
pub fn build_engine(config: &AppConfig) -> Result<TurnEngine, BoxError> {
    let provider = build_provider(config)?;
    let knowledge = build_knowledge(config, provider.clone())?;
    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpPageFetcher::new(
        Duration::from_secs(config.market.http_timeout_secs),
        config.turn.page_text_limit,
    )?);
    let registry: ActionRegistry =
        sagebot_tools::default_registry(config, knowledge.clone(), fetcher.clone())?;

    Ok(TurnEngine::from_config(
        config,
        provider,
        Arc::new(registry),
        knowledge,
        fetcher,
    ))
}

/// Message and session stores for the configured backend.
pub async fn build_stores(
    config: &AppConfig,
) -> Result<(Arc<dyn MessageStore>, Arc<dyn SessionStore>), BoxError> {
    match config.storage.backend {
        StorageBackend::Memory => {
            let store = InMemoryStore::new();
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        StorageBackend::Sqlite => {
            let path = &config.storage.sqlite_path;
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            let store = Arc::new(sagebot_memory::SqliteStore::new(path).await?);
            Ok((store.clone(), store))
        }
    }
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), BoxError> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let engine = build_engine(&config)?;
    let (messages, sessions) = build_stores(&config).await?;
    info!(
        model = %config.model,
        actions = engine.registry().len(),
        store = messages.name(),
        "Gateway components ready"
    );

    let state = Arc::new(GatewayState {
        engine: Arc::new(engine),
        messages,
        sessions,
        history_limit: config.turn.history_limit,
    });
    let app = build_router(state, &config.gateway.allowed_origins);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

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
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use sagebot_agent::ModelInvoker;
    use sagebot_core::error::ProviderError;
    use sagebot_core::provider::{GenerateRequest, Generation};
    use tower::ServiceExt;

    struct Silent;

    #[async_trait::async_trait]
    impl Provider for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        async fn generate(&self, _request: GenerateRequest) -> Result<Generation, ProviderError> {
            Ok(Generation::Text(String::new()))
        }
    }

    fn test_state() -> SharedState {
        let store = InMemoryStore::new();
        Arc::new(GatewayState {
            engine: Arc::new(TurnEngine::new(
                ModelInvoker::new(Arc::new(Silent), "test"),
                Arc::new(ActionRegistry::new()),
            )),
            messages: Arc::new(store.clone()),
            sessions: Arc::new(store),
            history_limit: 10,
        })
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state(), &[]);

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let app = build_router(test_state(), &["https://safebroker.org".to_string()]);

        let req = Request::builder()
            .method("OPTIONS")
            .uri("/api/stream")
            .header("origin", "https://safebroker.org")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://safebroker.org"
        );
    }

    #[test]
    fn missing_api_key_is_reported() {
        let err = build_provider(&AppConfig::default()).err().unwrap();
        assert!(err.to_string().contains("No API key"));
    }

    #[tokio::test]
    async fn memory_backend_stores() {
        let (messages, _) = build_stores(&AppConfig::default()).await.unwrap();
        assert_eq!(messages.name(), "in_memory");
    }
}
