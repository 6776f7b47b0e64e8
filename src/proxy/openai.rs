//! OpenAI-compatible endpoints.
//!
//! `POST /v1/chat/completions` and `POST /v1/responses`. Multi-tenant: the
//! client's `Authorization` header is forwarded verbatim and never stored;
//! the proxy keeps only its hash. Request bodies are treated as opaque JSON —
//! the proxy reads the security-relevant fields and forwards the original
//! payload untouched.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;
use tracing::info;

use super::dispatch::CheckpointDispatcher;
use super::{forward, guarded_sse_response, missing_credential, AppState};
use crate::error::GateError;
use crate::identity;
use crate::policy::ToolPayload;

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Some(credential) = header_str(&headers, "authorization") else {
        return missing_credential("Authorization");
    };
    let mut dispatcher = state.dispatcher(identity::tenant_id(credential));
    info!(
        correlation_id = dispatcher.correlation_id(),
        tenant_id = dispatcher.tenant_id(),
        "chat completions request"
    );

    match run_request_checks(
        &mut dispatcher,
        &chat_prompt_text(&body),
        &chat_tool_definitions(&body),
        chat_tool_responses(&body),
    )
    .await
    {
        Ok(None) => {}
        Ok(Some(block)) => return block.into_response(),
        Err(e) => return e.into_response(),
    }

    let url = format!("{}/v1/chat/completions", state.upstream.openai_base_url);
    let upstream = match forward(&state.http, &url, "authorization", credential, &body).await {
        Ok(upstream) => upstream,
        Err(e) => return e.into_response(),
    };

    if body["stream"].as_bool().unwrap_or(false) {
        return guarded_sse_response(upstream, dispatcher, state.stream, extract_chat_delta);
    }

    let response: Value = match upstream.json().await {
        Ok(value) => value,
        Err(e) => return GateError::Http(e).into_response(),
    };
    match run_response_checks(
        &mut dispatcher,
        &chat_response_text(&response),
        chat_response_tool_calls(&response),
    )
    .await
    {
        Ok(None) => Json(response).into_response(),
        Ok(Some(block)) => block.into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /v1/responses`
pub async fn responses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Some(credential) = header_str(&headers, "authorization") else {
        return missing_credential("Authorization");
    };
    let mut dispatcher = state.dispatcher(identity::tenant_id(credential));
    info!(
        correlation_id = dispatcher.correlation_id(),
        tenant_id = dispatcher.tenant_id(),
        "responses request"
    );

    match run_request_checks(
        &mut dispatcher,
        &responses_prompt_text(&body),
        &responses_tool_definitions(&body),
        responses_tool_outputs(&body),
    )
    .await
    {
        Ok(None) => {}
        Ok(Some(block)) => return block.into_response(),
        Err(e) => return e.into_response(),
    }

    let url = format!("{}/v1/responses", state.upstream.openai_base_url);
    let upstream = match forward(&state.http, &url, "authorization", credential, &body).await {
        Ok(upstream) => upstream,
        Err(e) => return e.into_response(),
    };

    if body["stream"].as_bool().unwrap_or(false) {
        return guarded_sse_response(upstream, dispatcher, state.stream, extract_responses_delta);
    }

    let response: Value = match upstream.json().await {
        Ok(value) => value,
        Err(e) => return GateError::Http(e).into_response(),
    };
    match run_response_checks(
        &mut dispatcher,
        &responses_output_text(&response),
        responses_output_tool_calls(&response),
    )
    .await
    {
        Ok(None) => Json(response).into_response(),
        Ok(Some(block)) => block.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Prompt, tool-definition, and tool-response checks, in lifecycle order.
async fn run_request_checks(
    dispatcher: &mut CheckpointDispatcher,
    prompt: &str,
    tools: &[ToolPayload],
    tool_responses: Vec<ToolPayload>,
) -> crate::error::Result<Option<super::dispatch::PolicyBlock>> {
    if let Some(block) = dispatcher.check_prompt(prompt).await?.into_block() {
        return Ok(Some(block));
    }
    if let Some(block) = dispatcher
        .check_tool_definitions(tools)
        .await?
        .into_block()
    {
        return Ok(Some(block));
    }
    for tool in tool_responses {
        if let Some(block) = dispatcher.check_tool_response(tool).await?.into_block() {
            return Ok(Some(block));
        }
    }
    Ok(None)
}

/// Tool-call and model-response checks for a full (non-streamed) response.
async fn run_response_checks(
    dispatcher: &mut CheckpointDispatcher,
    response_text: &str,
    tool_calls: Vec<ToolPayload>,
) -> crate::error::Result<Option<super::dispatch::PolicyBlock>> {
    for tool in tool_calls {
        if let Some(block) = dispatcher.check_tool_call(tool).await?.into_block() {
            return Ok(Some(block));
        }
    }
    Ok(dispatcher
        .check_response(response_text, false)
        .await?
        .into_block())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Text of one message `content` field: plain string or part array.
fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn chat_prompt_text(body: &Value) -> String {
    let Some(messages) = body["messages"].as_array() else {
        return String::new();
    };
    messages
        .iter()
        .filter(|m| m["role"].as_str() != Some("tool"))
        .map(|m| content_text(&m["content"]))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn chat_tool_definitions(body: &Value) -> Vec<ToolPayload> {
    let Some(tools) = body["tools"].as_array() else {
        return Vec::new();
    };
    tools
        .iter()
        .filter(|t| t["type"].as_str() == Some("function"))
        .map(|t| {
            let function = &t["function"];
            ToolPayload {
                name: function["name"].as_str().unwrap_or("unknown").to_string(),
                arguments: function
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({})),
            }
        })
        .collect()
}

/// `role: "tool"` messages carry tool execution results back to the model.
fn chat_tool_responses(body: &Value) -> Vec<ToolPayload> {
    let Some(messages) = body["messages"].as_array() else {
        return Vec::new();
    };
    messages
        .iter()
        .filter(|m| m["role"].as_str() == Some("tool"))
        .map(|m| ToolPayload {
            name: m["tool_call_id"]
                .as_str()
                .or_else(|| m["name"].as_str())
                .unwrap_or("tool")
                .to_string(),
            arguments: serde_json::json!({"content": content_text(&m["content"])}),
        })
        .collect()
}

fn chat_response_text(response: &Value) -> String {
    let Some(choices) = response["choices"].as_array() else {
        return String::new();
    };
    choices
        .iter()
        .filter_map(|c| c["message"]["content"].as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn chat_response_tool_calls(response: &Value) -> Vec<ToolPayload> {
    let Some(choices) = response["choices"].as_array() else {
        return Vec::new();
    };
    choices
        .iter()
        .filter_map(|c| c["message"]["tool_calls"].as_array())
        .flatten()
        .map(|call| {
            let function = &call["function"];
            // Arguments arrive JSON-encoded; fall back to the raw string.
            let arguments = function["arguments"]
                .as_str()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_else(|| function["arguments"].clone());
            ToolPayload {
                name: function["name"].as_str().unwrap_or("unknown").to_string(),
                arguments,
            }
        })
        .collect()
}

/// Delta text of one chat-completions SSE event.
fn extract_chat_delta(event: &str) -> String {
    let mut out = String::new();
    for data in super::stream::sse_data_lines(event) {
        if data.trim() == "[DONE]" {
            continue;
        }
        let Ok(json) = serde_json::from_str::<Value>(data) else {
            continue;
        };
        if let Some(choices) = json["choices"].as_array() {
            for choice in choices {
                if let Some(text) = choice["delta"]["content"].as_str() {
                    out.push_str(text);
                }
            }
        }
    }
    out
}

fn responses_prompt_text(body: &Value) -> String {
    let mut parts = Vec::new();
    if let Some(instructions) = body["instructions"].as_str() {
        parts.push(instructions.to_string());
    }
    match &body["input"] {
        Value::String(s) => parts.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                if item["type"].as_str() == Some("function_call_output") {
                    continue;
                }
                let text = content_text(&item["content"]);
                if !text.is_empty() {
                    parts.push(text);
                }
            }
        }
        _ => {}
    }
    parts.join("\n")
}

/// The responses API declares functions flat, not nested under `function`.
fn responses_tool_definitions(body: &Value) -> Vec<ToolPayload> {
    let Some(tools) = body["tools"].as_array() else {
        return Vec::new();
    };
    tools
        .iter()
        .filter(|t| t["type"].as_str() == Some("function"))
        .map(|t| ToolPayload {
            name: t["name"].as_str().unwrap_or("unknown").to_string(),
            arguments: t
                .get("parameters")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
        })
        .collect()
}

fn responses_tool_outputs(body: &Value) -> Vec<ToolPayload> {
    let Some(items) = body["input"].as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter(|i| i["type"].as_str() == Some("function_call_output"))
        .map(|i| ToolPayload {
            name: i["call_id"].as_str().unwrap_or("tool").to_string(),
            arguments: serde_json::json!({"output": i["output"].clone()}),
        })
        .collect()
}

fn responses_output_text(response: &Value) -> String {
    let Some(output) = response["output"].as_array() else {
        return String::new();
    };
    output
        .iter()
        .filter(|item| item["type"].as_str() == Some("message"))
        .filter_map(|item| item["content"].as_array())
        .flatten()
        .filter_map(|part| part["text"].as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn responses_output_tool_calls(response: &Value) -> Vec<ToolPayload> {
    let Some(output) = response["output"].as_array() else {
        return Vec::new();
    };
    output
        .iter()
        .filter(|item| item["type"].as_str() == Some("function_call"))
        .map(|item| {
            let arguments = item["arguments"]
                .as_str()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_else(|| item["arguments"].clone());
            ToolPayload {
                name: item["name"].as_str().unwrap_or("unknown").to_string(),
                arguments,
            }
        })
        .collect()
}

/// Delta text of one responses-API SSE event.
fn extract_responses_delta(event: &str) -> String {
    let mut out = String::new();
    for data in super::stream::sse_data_lines(event) {
        let Ok(json) = serde_json::from_str::<Value>(data) else {
            continue;
        };
        let is_text_delta = json["type"]
            .as_str()
            .is_some_and(|t| t.ends_with("output_text.delta"));
        if is_text_delta {
            if let Some(delta) = json["delta"].as_str() {
                out.push_str(delta);
            }
        }
    }
    out
}
