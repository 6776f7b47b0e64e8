//! Provider-compatible HTTP surface.
//!
//! Exposes OpenAI- and Gemini-shaped endpoints, applies checkpoint policy
//! around the forwarded traffic, and passes the client credential through to
//! the upstream unchanged (only its hash is ever logged).
//!
//! - `POST /v1/chat/completions` (JSON and SSE-stream variants)
//! - `POST /v1/responses`
//! - `POST /v1beta/models/{model}:generateContent`
//! - `POST /v1beta/models/{model}:streamGenerateContent`
//! - `GET  /health`

pub mod dispatch;
pub mod gemini;
pub mod openai;
pub mod stream;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::config::{StreamConfig, UpstreamConfig};
use crate::error::{GateError, Result};
use crate::policy::manager::SecurityManager;
use dispatch::{CheckpointDispatcher, PolicyBlock};
use stream::{GuardEvent, SseChunker, StreamGuard};

/// Shared application state for all handlers.
///
/// Everything here is constructed once at startup and used read-only by
/// request tasks; concurrency needs no locking.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SecurityManager>,
    pub audit: Option<AuditLog>,
    pub http: reqwest::Client,
    pub upstream: UpstreamConfig,
    pub stream: StreamConfig,
}

impl AppState {
    /// A dispatcher bound to one request.
    pub fn dispatcher(&self, tenant_id: String) -> CheckpointDispatcher {
        let correlation_id = uuid::Uuid::new_v4().simple().to_string();
        CheckpointDispatcher::new(
            self.manager.clone(),
            self.audit.clone(),
            tenant_id,
            correlation_id,
        )
    }
}

/// Build the axum router with all endpoints.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/chat/completions", post(openai::chat_completions))
        .route("/v1/responses", post(openai::responses))
        .route("/v1beta/models/{model_action}", post(gemini::generate))
        .with_state(state)
}

/// The gate server. Binds, serves in a background task, and returns the
/// actual bound address (useful with port 0 in tests).
pub struct GateServer {
    listen_addr: String,
    state: Arc<AppState>,
}

impl GateServer {
    pub fn new(listen_addr: String, state: Arc<AppState>) -> Self {
        Self { listen_addr, state }
    }

    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("PromptGate listening on {}", local_addr);

        let app = router(self.state.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!("server error: {}", e);
            }
        });

        Ok(local_addr)
    }
}

/// `GET /health`
async fn health(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": ["openai", "gemini"],
    }))
}

impl IntoResponse for PolicyBlock {
    fn into_response(self) -> Response {
        (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"detail": self.detail()})),
        )
            .into_response()
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        match self {
            // Provider errors pass through unchanged; not a policy concern.
            GateError::Upstream { status, body } => {
                let status =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                (status, body).into_response()
            }
            GateError::Http(e) => {
                warn!("upstream connection error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    Json(serde_json::json!({"detail": "Bad gateway"})),
                )
                    .into_response()
            }
            other => {
                warn!("internal error: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"detail": "Internal server error"})),
                )
                    .into_response()
            }
        }
    }
}

/// 401 for a missing inbound credential.
pub(crate) fn missing_credential(header: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"detail": format!("Missing {} header", header)})),
    )
        .into_response()
}

/// Forward a JSON body upstream with the client credential attached.
///
/// Non-2xx responses become `GateError::Upstream` carrying the provider's
/// status and body verbatim.
pub(crate) async fn forward(
    client: &reqwest::Client,
    url: &str,
    credential_header: &str,
    credential: &str,
    body: &serde_json::Value,
) -> Result<reqwest::Response> {
    let response = client
        .post(url)
        .header(credential_header, credential)
        .json(body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GateError::Upstream {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Terminal SSE event sent when a stream is blocked after delivery started.
fn terminal_error_event(block: &PolicyBlock) -> Bytes {
    let payload = serde_json::json!({
        "error": {
            "message": block.detail(),
            "type": "policy_block",
            "code": 403,
        }
    });
    Bytes::from(format!("data: {}\n\n", payload))
}

/// Wrap an upstream SSE response in a [`StreamGuard`] and return the
/// client-facing body.
///
/// The pump task owns all per-stream state. It ends when the upstream
/// stream ends, the guard reaches a terminal decision, or the client
/// disconnects (send fails); dropping the task drops the in-flight upstream
/// read with it.
pub(crate) fn guarded_sse_response(
    upstream: reqwest::Response,
    dispatcher: CheckpointDispatcher,
    stream_cfg: StreamConfig,
    extract_text: fn(&str) -> String,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Bytes>>(16);

    tokio::spawn(async move {
        let mut guard = StreamGuard::new(dispatcher, stream_cfg.max_buffer_bytes);
        let mut chunker = SseChunker::new();
        let mut upstream_stream = upstream.bytes_stream();

        while let Some(item) = upstream_stream.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("upstream stream error: {}", e);
                    return;
                }
            };
            for event in chunker.feed(&chunk) {
                let text = extract_text(&String::from_utf8_lossy(&event));
                if !pump_guard_event(&tx, guard.push(event, &text).await).await {
                    return;
                }
            }
        }

        if let Some(tail) = chunker.remainder() {
            let text = extract_text(&String::from_utf8_lossy(&tail));
            if !pump_guard_event(&tx, guard.push(tail, &text).await).await {
                return;
            }
        }

        pump_guard_event(&tx, guard.finish().await).await;
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Deliver a guard event to the client. Returns `false` when the pump must
/// stop (terminal decision, guard error, or client gone).
async fn pump_guard_event(
    tx: &tokio::sync::mpsc::Sender<std::io::Result<Bytes>>,
    event: Result<GuardEvent>,
) -> bool {
    match event {
        Ok(GuardEvent::Flush(chunks)) => {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    // Client disconnected; stop reading upstream.
                    return false;
                }
            }
            true
        }
        Ok(GuardEvent::Blocked(block)) => {
            let _ = tx.send(Ok(terminal_error_event(&block))).await;
            false
        }
        Err(e) => {
            warn!("stream guard error: {}", e);
            false
        }
    }
}
