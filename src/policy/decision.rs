//! Verdict, Decision, and checkpoint Context types.
//!
//! These are the value types shared by every layer above them: policies
//! produce [`Decision`]s, the Security Manager composes them, and the
//! dispatcher carries the composite to the HTTP surface and the audit log.
//!
//! [`Verdict`] is a total order (`Allow < Log < Confirm < Block`), so
//! "most restrictive wins" is a plain `max` — a numeric rank comparison,
//! never string matching.

use serde::{Deserialize, Serialize};

/// Outcome severity of a policy evaluation, ascending.
///
/// The derived `Ord` follows declaration order, which is the severity
/// order. `Block` is absorbing under `max`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// No objection; content proceeds.
    #[default]
    Allow,
    /// Content proceeds, but the event is recorded for review.
    Log,
    /// Content requires an out-of-band confirmation before proceeding.
    Confirm,
    /// Content must not proceed.
    Block,
}

impl Verdict {
    /// Uppercase name used in audit lines (`ALLOW`, `LOG`, `CONFIRM`, `BLOCK`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Allow => "ALLOW",
            Verdict::Log => "LOG",
            Verdict::Confirm => "CONFIRM",
            Verdict::Block => "BLOCK",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// A configured policy rule matched (e.g., trigger keyword).
    PolicyViolation,
    /// Sensitive data (PII, credentials) was detected.
    SensitiveData,
    /// Content appears to exfiltrate previously seen data.
    Leakage,
    /// The policy's external detector was unreachable or timed out; the
    /// verdict reflects the policy's fail-open/fail-closed configuration.
    Unavailable,
    /// No policy had an opinion.
    None,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::PolicyViolation => "POLICY_VIOLATION",
            Reason::SensitiveData => "SENSITIVE_DATA",
            Reason::Leakage => "LEAKAGE",
            Reason::Unavailable => "UNAVAILABLE",
            Reason::None => "NONE",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A defined point in the traffic lifecycle where a policy decision is
/// required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// Outgoing user/system message, before the provider is contacted.
    Prompt,
    /// A tool declared on the outgoing request.
    ToolDefinition,
    /// A tool invocation emitted by the model.
    ToolCall,
    /// A tool execution result supplied back by the client.
    ToolResponse,
    /// The model's response, full or partial.
    ModelResponse,
}

impl CheckpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointKind::Prompt => "prompt",
            CheckpointKind::ToolDefinition => "tool_definition",
            CheckpointKind::ToolCall => "tool_call",
            CheckpointKind::ToolResponse => "tool_response",
            CheckpointKind::ModelResponse => "model_response",
        }
    }
}

impl std::fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool name plus arguments, attached to tool-related checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPayload {
    pub name: String,
    /// Arguments (tool call), result payload (tool response), or parameter
    /// schema (tool definition).
    pub arguments: serde_json::Value,
}

impl ToolPayload {
    /// Flatten the payload into scannable text: `name key=value ...`.
    pub fn as_scan_text(&self) -> String {
        match &self.arguments {
            serde_json::Value::Object(map) => {
                let args = map
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} {}", self.name, args)
            }
            other => format!("{} {}", self.name, other),
        }
    }
}

/// Immutable snapshot of one checkpoint evaluation.
///
/// Built once per checkpoint by the dispatcher and handed to every
/// applicable policy; policies must not mutate it (enforced by `&Context`).
#[derive(Debug, Clone)]
pub struct Context {
    pub kind: CheckpointKind,
    /// One-way hash of the client credential (audit only).
    pub tenant_id: String,
    /// Request-scoped id correlating all decisions for one request.
    pub correlation_id: String,
    /// The natural-language content under evaluation.
    pub text: String,
    /// Tool name + arguments for tool-related checkpoints.
    pub tool: Option<ToolPayload>,
    /// `true` for a streaming chunk that has not reached end of turn.
    pub is_partial: bool,
}

impl Context {
    pub fn prompt(tenant_id: &str, correlation_id: &str, text: &str) -> Self {
        Self {
            kind: CheckpointKind::Prompt,
            tenant_id: tenant_id.to_string(),
            correlation_id: correlation_id.to_string(),
            text: text.to_string(),
            tool: None,
            is_partial: false,
        }
    }

    pub fn tool_definition(tenant_id: &str, correlation_id: &str, tool: ToolPayload) -> Self {
        Self {
            kind: CheckpointKind::ToolDefinition,
            tenant_id: tenant_id.to_string(),
            correlation_id: correlation_id.to_string(),
            text: tool.as_scan_text(),
            tool: Some(tool),
            is_partial: false,
        }
    }

    pub fn tool_call(tenant_id: &str, correlation_id: &str, tool: ToolPayload) -> Self {
        Self {
            kind: CheckpointKind::ToolCall,
            tenant_id: tenant_id.to_string(),
            correlation_id: correlation_id.to_string(),
            text: tool.as_scan_text(),
            tool: Some(tool),
            is_partial: false,
        }
    }

    pub fn tool_response(tenant_id: &str, correlation_id: &str, tool: ToolPayload) -> Self {
        Self {
            kind: CheckpointKind::ToolResponse,
            tenant_id: tenant_id.to_string(),
            correlation_id: correlation_id.to_string(),
            text: tool.as_scan_text(),
            tool: Some(tool),
            is_partial: false,
        }
    }

    pub fn model_response(
        tenant_id: &str,
        correlation_id: &str,
        text: &str,
        is_partial: bool,
    ) -> Self {
        Self {
            kind: CheckpointKind::ModelResponse,
            tenant_id: tenant_id.to_string(),
            correlation_id: correlation_id.to_string(),
            text: text.to_string(),
            tool: None,
            is_partial,
        }
    }
}

/// The structured record of one evaluation's outcome. Immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub reason: Reason,
    /// Human-readable explanation surfaced in block responses and audit.
    pub details: String,
    /// Name of the policy that produced this decision, or `"composite"`.
    pub policy_name: String,
    pub checkpoint: CheckpointKind,
    pub correlation_id: String,
    /// RFC 3339 creation time.
    pub timestamp: String,
}

impl Decision {
    pub fn new(
        policy_name: &str,
        ctx: &Context,
        verdict: Verdict,
        reason: Reason,
        details: impl Into<String>,
    ) -> Self {
        Self {
            verdict,
            reason,
            details: details.into(),
            policy_name: policy_name.to_string(),
            checkpoint: ctx.kind,
            correlation_id: ctx.correlation_id.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// The synthetic safe decision returned when no policy has an opinion.
    pub fn allow(policy_name: &str, ctx: &Context) -> Self {
        Self::new(policy_name, ctx, Verdict::Allow, Reason::None, "")
    }

    pub fn is_blocking(&self) -> bool {
        self.verdict >= Verdict::Block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_severity_order() {
        assert!(Verdict::Allow < Verdict::Log);
        assert!(Verdict::Log < Verdict::Confirm);
        assert!(Verdict::Confirm < Verdict::Block);
    }

    #[test]
    fn block_is_absorbing_under_max() {
        let all = [Verdict::Allow, Verdict::Log, Verdict::Confirm, Verdict::Block];
        for v in all {
            assert_eq!(v.max(Verdict::Block), Verdict::Block);
            assert_eq!(Verdict::Block.max(v), Verdict::Block);
        }
    }

    #[test]
    fn verdict_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Verdict::Block).unwrap(), "\"block\"");
        let v: Verdict = serde_json::from_str("\"confirm\"").unwrap();
        assert_eq!(v, Verdict::Confirm);
    }

    #[test]
    fn checkpoint_kind_display() {
        assert_eq!(CheckpointKind::ToolDefinition.to_string(), "tool_definition");
        assert_eq!(CheckpointKind::ModelResponse.to_string(), "model_response");
    }

    #[test]
    fn tool_payload_scan_text_includes_args() {
        let tool = ToolPayload {
            name: "get_weather".to_string(),
            arguments: serde_json::json!({"location": "Paris"}),
        };
        let text = tool.as_scan_text();
        assert!(text.contains("get_weather"));
        assert!(text.contains("location"));
        assert!(text.contains("Paris"));
    }

    #[test]
    fn synthetic_allow_has_reason_none() {
        let ctx = Context::prompt("tenant", "corr-1", "hello");
        let d = Decision::allow("composite", &ctx);
        assert_eq!(d.verdict, Verdict::Allow);
        assert_eq!(d.reason, Reason::None);
        assert_eq!(d.correlation_id, "corr-1");
        assert!(!d.is_blocking());
    }

    #[test]
    fn partial_context_flag() {
        let ctx = Context::model_response("t", "c", "some text", true);
        assert!(ctx.is_partial);
        assert_eq!(ctx.kind, CheckpointKind::ModelResponse);
    }
}
