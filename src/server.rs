//! JSON HTTP API for the retrieval pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/initialize` | Build (or force-rebuild) the index snapshot |
//! | `POST` | `/sessions` | Create a conversation session |
//! | `POST` | `/chat` | Answer one query within a session |
//! | `POST` | `/sessions/{id}/reset` | Clear a session's turns |
//! | `GET`  | `/health` | Health check |
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `index_not_built`
//! (409), `budget_exceeded` (400), `internal` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::pipeline::{ChatError, ChatResponse, RagPipeline, RebuildReport};

/// Starts the HTTP server on the configured bind address; runs until the
/// process is terminated.
pub async fn run_server(pipeline: Arc<RagPipeline>) -> anyhow::Result<()> {
    let bind_addr = pipeline.config().server.bind.clone();
    let app = router(pipeline);

    info!("listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Route table, separated from [`run_server`] so tests can drive it
/// without binding a socket.
pub fn router(pipeline: Arc<RagPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/initialize", post(handle_initialize))
        .route("/sessions", post(handle_create_session))
        .route("/chat", post(handle_chat))
        .route("/sessions/{id}/reset", post(handle_reset))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(pipeline)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: code.to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::SessionNotFound(_) => not_found(e.to_string()),
            ChatError::IndexNotBuilt => AppError {
                status: StatusCode::CONFLICT,
                code: "index_not_built".to_string(),
                message: e.to_string(),
            },
            ChatError::BudgetExceeded(_) => bad_request("budget_exceeded", e.to_string()),
            ChatError::Internal(err) => internal(err.to_string()),
        }
    }
}

// ============ POST /initialize ============

#[derive(Deserialize)]
struct InitializeRequest {
    #[serde(default)]
    force_rebuild: bool,
}

async fn handle_initialize(
    State(pipeline): State<Arc<RagPipeline>>,
    Json(req): Json<InitializeRequest>,
) -> Result<Json<RebuildReport>, AppError> {
    let report = pipeline
        .rebuild_index(req.force_rebuild)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(report))
}

// ============ POST /sessions ============

#[derive(Deserialize)]
struct CreateSessionRequest {
    user_id: String,
    #[serde(default)]
    title: String,
}

#[derive(Serialize)]
struct CreateSessionResponse {
    session_id: String,
}

async fn handle_create_session(
    State(pipeline): State<Arc<RagPipeline>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, AppError> {
    if req.user_id.trim().is_empty() {
        return Err(bad_request("bad_request", "user_id must not be empty"));
    }
    let session_id = pipeline
        .create_session(&req.user_id, &req.title)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(CreateSessionResponse { session_id }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequestBody {
    session_id: String,
    #[allow(dead_code)]
    #[serde(default)]
    user_id: String,
    query: String,
    #[serde(default = "default_true")]
    include_history: bool,
    #[serde(default)]
    evaluate: bool,
}

fn default_true() -> bool {
    true
}

async fn handle_chat(
    State(pipeline): State<Arc<RagPipeline>>,
    Json(req): Json<ChatRequestBody>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("bad_request", "query must not be empty"));
    }
    let response = pipeline
        .chat(&req.session_id, &req.query, req.include_history, req.evaluate)
        .await?;
    Ok(Json(response))
}

// ============ POST /sessions/{id}/reset ============

async fn handle_reset(
    State(pipeline): State<Arc<RagPipeline>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    pipeline.reset_session(&id).await?;
    Ok(Json(serde_json::json!({ "reset": true })))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    initialized: bool,
}

async fn handle_health(State(pipeline): State<Arc<RagPipeline>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        initialized: pipeline.is_initialized(),
    })
}
