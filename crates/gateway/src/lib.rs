//! HTTP gateway for the SaferPlaces agent.
//!
//! Endpoints:
//!
//! - `GET  /health`              — liveness
//! - `POST /t`                   — open a thread for a user's project
//! - `POST /t/{id}`              — send a prompt; events as a JSON array, or
//!   NDJSON when `stream` is set
//! - `GET  /t/{id}/layers`       — the project's layer registry
//! - `POST /t/{id}/layers`       — register a layer
//!
//! Built on Axum.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::{
    Router,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_stream::StreamExt;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use saferplaces_agent::{AgentRuntime, NewLayer, Session, SessionRegistry, TurnEvent};
use saferplaces_core::error::Error;
use saferplaces_core::message::ThreadId;
use saferplaces_core::state::{LayerDescriptor, LayerType};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub sessions: SessionRegistry,
}

impl GatewayState {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self {
            sessions: SessionRegistry::new(runtime),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - CORS for the local web client
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(HeaderValue::from_static("http://localhost:8080")))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .route("/t", post(start_handler))
        .route("/t/{thread_id}", post(prompt_handler))
        .route("/t/{thread_id}/layers", get(layers_handler).post(add_layer_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: saferplaces_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider = saferplaces_providers::router::build_from_config(&config)
        .default_provider()
        .ok_or("No default provider configured — set an API key")?;
    let runtime = Arc::new(AgentRuntime::from_config(&config, provider)?);
    let app = build_router(Arc::new(GatewayState::new(runtime)));

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Errors ---

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

async fn session(state: &GatewayState, thread_id: &str) -> Result<Arc<Session>, ApiError> {
    state
        .sessions
        .get(thread_id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Thread '{thread_id}' not found")))
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

#[derive(Deserialize)]
struct StartRequest {
    user_id: String,
    project_id: String,
    /// Reopen a checkpointed thread instead of starting a new one.
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct StartResponse {
    thread_id: String,
}

async fn start_handler(
    State(state): State<SharedState>,
    Json(payload): Json<StartRequest>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    if payload.user_id.trim().is_empty() || payload.project_id.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "user_id and project_id are required"));
    }

    let thread_id = payload.thread_id.as_deref().map(ThreadId::from);
    let session = state
        .sessions
        .start(thread_id, &payload.user_id, &payload.project_id)
        .await
        .map_err(|e| {
            warn!(error = %e, "thread could not be opened");
            let status = match &e {
                Error::ThreadInUse { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            api_error(status, e.to_string())
        })?;
    info!(thread = %session.thread_id(), user = %payload.user_id, project = %payload.project_id, "thread opened");

    Ok((
        StatusCode::CREATED,
        Json(StartResponse {
            thread_id: session.thread_id().to_string(),
        }),
    ))
}

#[derive(Deserialize)]
struct PromptRequest {
    prompt: String,
    #[serde(default)]
    stream: bool,
}

async fn prompt_handler(
    State(state): State<SharedState>,
    Path(thread_id): Path<String>,
    Json(payload): Json<PromptRequest>,
) -> Result<Response, ApiError> {
    if payload.prompt.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "prompt must not be empty"));
    }
    let session = session(&state, &thread_id).await?;
    info!(thread = %thread_id, stream = payload.stream, "prompt received");

    let turn = session.prompt(&payload.prompt).await;
    if !payload.stream {
        let events: Vec<TurnEvent> = turn.collect().await;
        return Ok(Json(events).into_response());
    }

    let lines = turn.into_stream().map(|event| {
        let mut line = serde_json::to_vec(&event).unwrap_or_default();
        line.push(b'\n');
        Ok::<_, std::convert::Infallible>(line)
    });
    Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], Body::from_stream(lines)).into_response())
}

#[derive(Serialize, Deserialize)]
struct LayersResponse {
    layers: Vec<LayerDescriptor>,
}

async fn layers_handler(
    State(state): State<SharedState>,
    Path(thread_id): Path<String>,
) -> Result<Json<LayersResponse>, ApiError> {
    let session = session(&state, &thread_id).await?;
    Ok(Json(LayersResponse {
        layers: session.layers().await,
    }))
}

#[derive(Deserialize)]
struct AddLayerRequest {
    src: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "type")]
    layer_type: Option<LayerType>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

async fn add_layer_handler(
    State(state): State<SharedState>,
    Path(thread_id): Path<String>,
    Json(payload): Json<AddLayerRequest>,
) -> Result<Json<LayersResponse>, ApiError> {
    if payload.src.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "src must not be empty"));
    }
    let session = session(&state, &thread_id).await?;
    let layers = session
        .register_layer(NewLayer {
            src: payload.src,
            title: payload.title,
            description: payload.description,
            layer_type: payload.layer_type,
            metadata: payload.metadata,
        })
        .await
        .map_err(|e| {
            warn!(thread = %thread_id, error = %e, "layer not registered");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    Ok(Json(LayersResponse { layers }))
}
