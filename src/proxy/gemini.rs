//! Gemini-compatible endpoints.
//!
//! `POST /v1beta/models/{model}:generateContent` and
//! `POST /v1beta/models/{model}:streamGenerateContent`. Multi-tenant: the
//! client's `x-goog-api-key` header is forwarded verbatim and never stored.

use std::sync::Arc;

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;
use tracing::info;

use super::{forward, guarded_sse_response, missing_credential, AppState};
use crate::error::GateError;
use crate::identity;
use crate::policy::ToolPayload;

/// `POST /v1beta/models/{model}:generateContent` and `:streamGenerateContent`.
///
/// axum captures the whole `model:action` segment; the action decides
/// between the buffered and streaming paths.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Path(model_action): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Some((model, action)) = model_action.split_once(':') else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"detail": "Unknown model action"})),
        )
            .into_response();
    };
    let streaming = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"detail": format!("Unknown action '{}'", action)})),
            )
                .into_response();
        }
    };

    let Some(credential) = headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) else {
        return missing_credential("x-goog-api-key");
    };
    let mut dispatcher = state.dispatcher(identity::tenant_id(credential));
    info!(
        correlation_id = dispatcher.correlation_id(),
        tenant_id = dispatcher.tenant_id(),
        model,
        streaming,
        "gemini request"
    );

    // Checkpoint order: prompt, tool definitions, tool responses from the
    // conversation history.
    let checks = async {
        if let Some(block) = dispatcher
            .check_prompt(&prompt_text(&body))
            .await?
            .into_block()
        {
            return Ok(Some(block));
        }
        if let Some(block) = dispatcher
            .check_tool_definitions(&tool_definitions(&body))
            .await?
            .into_block()
        {
            return Ok(Some(block));
        }
        for tool in function_responses(&body) {
            if let Some(block) = dispatcher.check_tool_response(tool).await?.into_block() {
                return Ok(Some(block));
            }
        }
        Ok::<_, GateError>(None)
    };
    match checks.await {
        Ok(None) => {}
        Ok(Some(block)) => return block.into_response(),
        Err(e) => return e.into_response(),
    }

    let url = upstream_url(&state.upstream.gemini_base_url, model, action, query, streaming);
    let upstream = match forward(&state.http, &url, "x-goog-api-key", credential, &body).await {
        Ok(upstream) => upstream,
        Err(e) => return e.into_response(),
    };

    if streaming {
        return guarded_sse_response(upstream, dispatcher, state.stream, extract_stream_text);
    }

    let response: Value = match upstream.json().await {
        Ok(value) => value,
        Err(e) => return GateError::Http(e).into_response(),
    };

    for tool in response_function_calls(&response) {
        match dispatcher.check_tool_call(tool).await {
            Ok(checked) => {
                if let Some(block) = checked.into_block() {
                    return block.into_response();
                }
            }
            Err(e) => return e.into_response(),
        }
    }
    match dispatcher.check_response(&response_text(&response), false).await {
        Ok(checked) => match checked.into_block() {
            None => Json(response).into_response(),
            Some(block) => block.into_response(),
        },
        Err(e) => e.into_response(),
    }
}

/// Upstream URL with the client's query passed through; the streaming path
/// always requests SSE framing.
fn upstream_url(
    base: &str,
    model: &str,
    action: &str,
    query: Option<String>,
    streaming: bool,
) -> String {
    let mut query = query.unwrap_or_default();
    if streaming && !query.contains("alt=sse") {
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str("alt=sse");
    }
    if query.is_empty() {
        format!("{}/v1beta/models/{}:{}", base, model, action)
    } else {
        format!("{}/v1beta/models/{}:{}?{}", base, model, action, query)
    }
}

/// Non-thought text from `contents[].parts[]`.
fn prompt_text(body: &Value) -> String {
    let Some(contents) = body["contents"].as_array() else {
        return String::new();
    };
    let mut parts_text = Vec::new();
    for content in contents {
        let Some(parts) = content["parts"].as_array() else {
            continue;
        };
        for part in parts {
            if part["thought"].as_bool().unwrap_or(false) {
                continue;
            }
            if let Some(text) = part["text"].as_str() {
                parts_text.push(text);
            }
        }
    }
    parts_text.join("\n")
}

fn tool_definitions(body: &Value) -> Vec<ToolPayload> {
    let Some(tools) = body["tools"].as_array() else {
        return Vec::new();
    };
    tools
        .iter()
        .filter_map(|t| t["functionDeclarations"].as_array())
        .flatten()
        .map(|decl| ToolPayload {
            name: decl["name"].as_str().unwrap_or("unknown").to_string(),
            arguments: decl
                .get("parameters")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
        })
        .collect()
}

/// `functionResponse` parts in the conversation history are tool results
/// flowing back to the model.
fn function_responses(body: &Value) -> Vec<ToolPayload> {
    let Some(contents) = body["contents"].as_array() else {
        return Vec::new();
    };
    contents
        .iter()
        .filter_map(|c| c["parts"].as_array())
        .flatten()
        .filter_map(|part| part.get("functionResponse"))
        .map(|fr| ToolPayload {
            name: fr["name"].as_str().unwrap_or("unknown").to_string(),
            arguments: fr.get("response").cloned().unwrap_or_else(|| serde_json::json!({})),
        })
        .collect()
}

fn response_text(response: &Value) -> String {
    let Some(candidates) = response["candidates"].as_array() else {
        return String::new();
    };
    let mut texts = Vec::new();
    for candidate in candidates {
        let Some(parts) = candidate["content"]["parts"].as_array() else {
            continue;
        };
        for part in parts {
            if part["thought"].as_bool().unwrap_or(false) {
                continue;
            }
            if let Some(text) = part["text"].as_str() {
                texts.push(text);
            }
        }
    }
    texts.join("\n")
}

fn response_function_calls(response: &Value) -> Vec<ToolPayload> {
    let Some(candidates) = response["candidates"].as_array() else {
        return Vec::new();
    };
    candidates
        .iter()
        .filter_map(|c| c["content"]["parts"].as_array())
        .flatten()
        .filter_map(|part| part.get("functionCall"))
        .map(|fc| ToolPayload {
            name: fc["name"].as_str().unwrap_or("unknown").to_string(),
            arguments: fc.get("args").cloned().unwrap_or_else(|| serde_json::json!({})),
        })
        .collect()
}

/// Text of one streamed SSE event (same candidate shape as the full
/// response).
fn extract_stream_text(event: &str) -> String {
    let mut out = String::new();
    for data in super::stream::sse_data_lines(event) {
        let Ok(json) = serde_json::from_str::<Value>(data) else {
            continue;
        };
        out.push_str(&response_text(&json));
    }
    out
}
