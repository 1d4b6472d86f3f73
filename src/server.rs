//! HTTP server: webhook, admin API and health check.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Webhook URL verification (echoes `echostr` when the signature checks out) |
//! | `POST` | `/` | Inbound message; replies with an XML text envelope |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/admin/files` | Source documents with their sync status |
//! | `POST` | `/admin/process` | Start a sync pass (`?wait=true` runs it inline) |
//! | `GET`  | `/admin/status` | Progress of the current or last pass |
//!
//! # Error Contract
//!
//! Admin failures use a JSON body:
//!
//! ```json
//! { "error": { "code": "upstream", "message": "https://api.github.com/... returned 503: ..." } }
//! ```
//!
//! A sync trigger that loses the single-flight race gets `409` with
//! `{ "error": "already running" }`.
//!
//! The webhook never answers with an error status for a bad message body;
//! it returns an empty `200` so the platform does not retry.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::answer::Answerer;
use crate::completion::{ChatCompletionClient, CompletionClient};
use crate::config::{secret_from_env, Config};
use crate::docstore::{create_store, DocumentStore};
use crate::error::SyncError;
use crate::models::Document;
use crate::state::{SyncState, SyncStatus};
use crate::sync::SyncOrchestrator;
use crate::webhook::{build_reply, parse_message, verify_signature, GREETING};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    answerer: Arc<Answerer>,
    sync: Arc<SyncOrchestrator>,
    /// Shared secret for the verification handshake. `None` rejects every handshake.
    webhook_token: Option<String>,
    mention_markers: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        completion: Arc<dyn CompletionClient>,
    ) -> anyhow::Result<Self> {
        let state = Arc::new(SyncState::in_memory(config.sync.log_capacity));
        let webhook_token = secret_from_env(&config.webhook.token_env);
        if webhook_token.is_none() {
            warn!(var = %config.webhook.token_env, "webhook token not set, verification will fail");
        }

        Ok(Self {
            answerer: Arc::new(Answerer::new(config, store.clone(), completion)?),
            sync: Arc::new(SyncOrchestrator::new(state, store, config)?),
            webhook_token,
            mention_markers: Arc::new(config.webhook.mention_markers.clone()),
        })
    }

    pub fn sync(&self) -> &Arc<SyncOrchestrator> {
        &self.sync
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_verify).post(handle_message))
        .route("/health", get(handle_health))
        .route("/admin/files", get(handle_files))
        .route("/admin/process", post(handle_process))
        .route("/admin/status", get(handle_status))
        .layer(cors)
        .with_state(state)
}

/// Starts the server with the configured document store and completion model.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store: Arc<dyn DocumentStore> = Arc::from(create_store(&config.store)?);
    let completion = Arc::new(ChatCompletionClient::new(&config.completion)?);
    run_server_with(config, store, completion).await
}

/// Like [`run_server`], with the store and completion model supplied by the caller.
pub async fn run_server_with(
    config: &Config,
    store: Arc<dyn DocumentStore>,
    completion: Arc<dyn CompletionClient>,
) -> anyhow::Result<()> {
    let state = AppState::new(config, store, completion)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "listening");
    axum::serve(listener, app).await?;

    Ok(())
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

/// Constructs a 502 for document-store failures.
fn upstream(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream".to_string(),
        message: message.into(),
    }
}

fn conflict(e: SyncError) -> Response {
    (
        StatusCode::CONFLICT,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
        .into_response()
}

// ============ GET / ============

#[derive(Deserialize)]
struct VerifyParams {
    signature: Option<String>,
    timestamp: Option<String>,
    nonce: Option<String>,
    echostr: Option<String>,
}

async fn handle_verify(State(state): State<AppState>, Query(q): Query<VerifyParams>) -> Response {
    let verified = match (&state.webhook_token, &q.signature, &q.timestamp, &q.nonce) {
        (Some(token), Some(sig), Some(ts), Some(nonce)) => verify_signature(token, sig, ts, nonce),
        _ => false,
    };

    if verified {
        (StatusCode::OK, q.echostr.unwrap_or_default()).into_response()
    } else {
        warn!("webhook verification failed");
        (StatusCode::FORBIDDEN, "Forbidden").into_response()
    }
}

// ============ POST / ============

async fn handle_message(State(state): State<AppState>, body: String) -> Response {
    let msg = match parse_message(&body) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "ignoring unparseable message");
            return StatusCode::OK.into_response();
        }
    };

    let reply = match msg.question(&state.mention_markers) {
        Some(question) => {
            info!(from = %msg.from_user, "question received");
            state.answerer.answer_question(&question).await
        }
        None => GREETING.to_string(),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/xml; charset=utf-8")
        .body(Body::from(build_reply(&msg, &reply, Utc::now().timestamp())))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    timestamp: DateTime<Utc>,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

// ============ Admin ============

#[derive(Serialize)]
struct FilesResponse {
    files: Vec<Document>,
}

async fn handle_files(State(state): State<AppState>) -> Result<Json<FilesResponse>, AppError> {
    let files = state
        .sync
        .list_known_documents()
        .await
        .map_err(|e| upstream(format!("{:#}", e)))?;
    Ok(Json(FilesResponse { files }))
}

#[derive(Deserialize)]
struct ProcessParams {
    #[serde(default)]
    wait: bool,
}

async fn handle_process(State(state): State<AppState>, Query(p): Query<ProcessParams>) -> Response {
    if p.wait {
        return match state.sync.run_sync().await {
            Ok(report) => Json(report).into_response(),
            Err(e) => conflict(e),
        };
    }

    // The flag is claimed before spawning; a losing caller gets 409.
    let guard = match state.sync.begin() {
        Ok(guard) => guard,
        Err(e) => return conflict(e),
    };

    let sync = state.sync.clone();
    tokio::spawn(async move {
        let report = sync.run_claimed(guard).await;
        info!(
            success = report.success,
            processed = report.processed,
            deleted = report.deleted,
            "background sync finished"
        );
    });

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "message": "sync started, poll /admin/status for progress",
            "processing": true,
        })),
    )
        .into_response()
}

async fn handle_status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.sync.status())
}
