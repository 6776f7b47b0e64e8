//! Streaming interception scenarios: the no-leak contract end to end.
//!
//! A stub upstream serves a canned SSE stream; the assertions inspect the
//! exact bytes the client receives.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use serde_json::json;
use tower::ServiceExt as _;

use promptgate::config::{StreamConfig, UpstreamConfig};
use promptgate::detect::RegexDetector;
use promptgate::policy::entity::{EntityPolicy, EntityPolicyConfig};
use promptgate::policy::keyword::KeywordPolicy;
use promptgate::policy::manager::SecurityManager;
use promptgate::policy::Verdict;
use promptgate::proxy::{router, AppState};

/// Stub upstream serving a fixed SSE stream for any POST.
async fn spawn_sse_stub(events: Vec<String>) -> SocketAddr {
    let payload: String = events.concat();

    let handler = move || {
        let payload = payload.clone();
        async move {
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/event-stream")
                .body(Body::from(payload))
                .unwrap()
        }
    };

    let app = Router::new()
        .route("/v1/chat/completions", post(handler.clone()))
        .route("/v1beta/models/{model_action}", post(handler));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn delta_event(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({"choices": [{"delta": {"content": text}}]})
    )
}

fn done_event() -> String {
    "data: [DONE]\n\n".to_string()
}

fn keyword_state(upstream: SocketAddr, keywords: &[&str]) -> Arc<AppState> {
    let mut manager = SecurityManager::new();
    manager.add_policy(Arc::new(KeywordPolicy::new(
        keywords.iter().map(|k| k.to_string()).collect(),
    )));
    state_with(upstream, manager)
}

fn entity_state(upstream: SocketAddr, categories: &[(&str, Verdict)]) -> Arc<AppState> {
    let mut config = EntityPolicyConfig::default();
    for (category, verdict) in categories {
        config.categories.insert(category.to_string(), *verdict);
    }
    let mut manager = SecurityManager::new();
    manager.add_policy(Arc::new(EntityPolicy::new(
        config,
        Arc::new(RegexDetector::new()),
    )));
    state_with(upstream, manager)
}

fn state_with(upstream: SocketAddr, manager: SecurityManager) -> Arc<AppState> {
    let base = format!("http://{}", upstream);
    Arc::new(AppState {
        manager: Arc::new(manager),
        audit: None,
        http: reqwest::Client::new(),
        upstream: UpstreamConfig {
            openai_base_url: base.clone(),
            gemini_base_url: base,
        },
        stream: StreamConfig::default(),
    })
}

/// Issue a streaming chat request and collect the full client-visible body.
async fn stream_request(app: Router, prompt: &str) -> (StatusCode, String) {
    let body = json!({
        "model": "gpt-test",
        "stream": true,
        "messages": [{"role": "user", "content": prompt}]
    });
    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("authorization", "Bearer sk-test")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

#[tokio::test]
async fn clean_stream_is_fully_forwarded() {
    let upstream = spawn_sse_stub(vec![
        delta_event("Hello "),
        delta_event("world. "),
        delta_event("More text here.\n"),
        done_event(),
    ])
    .await;
    let app = router(keyword_state(upstream, &["capsem_block"]));

    let (status, body) = stream_request(app, "say hello").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Hello "));
    assert!(body.contains("world. "));
    assert!(body.contains("More text here"));
    assert!(body.contains("[DONE]"));
}

#[tokio::test]
async fn marker_after_flushed_prefix_is_never_delivered() {
    // The first sentence is clean and flushes at its boundary; the marker in
    // the second sentence must block before any of its bytes go out.
    let upstream = spawn_sse_stub(vec![
        delta_event("Hello world. "),
        delta_event("BLOCKME and more text."),
        done_event(),
    ])
    .await;
    let app = router(keyword_state(upstream, &["blockme"]));

    let (status, body) = stream_request(app, "go").await;
    assert_eq!(status, StatusCode::OK);
    // Prefix flushed before the block is allowed to have happened.
    assert!(body.contains("Hello world. "));
    // No byte at or after the marker is ever observed by the client.
    assert!(!body.contains("BLOCKME"));
    // The stream ends with a terminal error event, not a silent truncation.
    assert!(body.contains("policy_block"));
    assert!(body.contains("Request blocked by security policy:"));
}

#[tokio::test]
async fn email_split_across_chunks_blocks_once_assembled() {
    let upstream = spawn_sse_stub(vec![
        delta_event("contact user@exa"),
        delta_event("mple.com today."),
        done_event(),
    ])
    .await;
    let app = router(entity_state(upstream, &[("EMAIL_ADDRESS", Verdict::Block)]));

    let (status, body) = stream_request(app, "how do I reach you?").await;
    assert_eq!(status, StatusCode::OK);
    // Neither fragment was ever flushed: the first chunk had no boundary, so
    // it was still held when the assembled address blocked.
    assert!(!body.contains("user@exa"));
    assert!(!body.contains("mple.com"));
    assert!(body.contains("policy_block"));
    assert!(body.contains("EMAIL_ADDRESS"));
}

#[tokio::test]
async fn log_verdict_forwards_stream_untouched() {
    let upstream = spawn_sse_stub(vec![
        delta_event("contact user@example.com today."),
        done_event(),
    ])
    .await;
    let app = router(entity_state(upstream, &[("EMAIL_ADDRESS", Verdict::Log)]));

    let (status, body) = stream_request(app, "how do I reach you?").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("user@example.com"));
    assert!(body.contains("[DONE]"));
    assert!(!body.contains("policy_block"));
}

#[tokio::test]
async fn blocked_prompt_never_opens_a_stream() {
    let upstream = spawn_sse_stub(vec![delta_event("never seen"), done_event()]).await;
    let app = router(keyword_state(upstream, &["capsem_block"]));

    let (status, body) = stream_request(app, "capsem_block stream please").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.contains("Request blocked by security policy:"));
    assert!(!body.contains("never seen"));
}

#[tokio::test]
async fn gemini_stream_blocks_on_trigger() {
    let events = vec![
        format!(
            "data: {}\n\n",
            json!({"candidates": [{"content": {"parts": [{"text": "safe sentence. "}]}}]})
        ),
        format!(
            "data: {}\n\n",
            json!({"candidates": [{"content": {"parts": [{"text": "capsem_block leak."}]}}]})
        ),
    ];
    let upstream = spawn_sse_stub(events).await;
    let app = router(keyword_state(upstream, &["capsem_block"]));

    let body = json!({
        "contents": [{"role": "user", "parts": [{"text": "stream something"}]}]
    });
    let req = Request::builder()
        .method("POST")
        .uri("/v1beta/models/gemini-2.5-flash:streamGenerateContent")
        .header("content-type", "application/json")
        .header("x-goog-api-key", "test-key")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let body = String::from_utf8_lossy(&bytes);
    assert!(body.contains("safe sentence. "));
    // Provider content after the trigger never reaches the client. (The
    // terminal error event may name the trigger itself; that is policy
    // configuration, not leaked content.)
    assert!(!body.contains("leak."));
    assert!(body.contains("policy_block"));
}
