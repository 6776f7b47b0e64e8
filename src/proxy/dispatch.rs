//! Checkpoint dispatcher.
//!
//! Drives the checkpoint sequence for one proxied request:
//! prompt → tool definitions → tool calls / tool responses → model response.
//! Each check builds an immutable [`Context`], evaluates it against the
//! shared [`SecurityManager`], records the composite decision in the audit
//! log, and surfaces a BLOCK as a typed [`PolicyBlock`] value — never as a
//! panic or error, so callers can distinguish "blocked by policy" from
//! "upstream failed".
//!
//! Checks must be issued in lifecycle order; an out-of-order call is a
//! programmer error and fails closed with `GateError::MalformedContext`.
//!
//! `Confirm` composites are audited and forwarded: the confirmation
//! transport is intentionally not part of this engine, and would attach
//! behind the dispatcher without touching policies.

use std::sync::Arc;

use crate::audit::{self, AuditLog};
use crate::error::{GateError, Result};
use crate::policy::manager::SecurityManager;
use crate::policy::{Context, Decision, ToolPayload, Verdict};

/// Which block-message prefix a [`PolicyBlock`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// A flagged tool definition: "Tool blocked by security policy: …".
    Tool,
    /// Flagged content anywhere else: "Request blocked by security policy: …".
    Content,
}

/// A BLOCK outcome, carrying the composite decision that produced it.
#[derive(Debug, Clone)]
pub struct PolicyBlock {
    pub decision: Decision,
    pub kind: BlockKind,
}

impl PolicyBlock {
    /// The client-facing detail string for the 403 body.
    pub fn detail(&self) -> String {
        match self.kind {
            BlockKind::Tool => {
                format!("Tool blocked by security policy: {}", self.decision.details)
            }
            BlockKind::Content => {
                format!("Request blocked by security policy: {}", self.decision.details)
            }
        }
    }
}

/// Result of one checkpoint evaluation.
#[derive(Debug)]
pub enum Checked {
    /// Verdict below BLOCK; content proceeds. Carries the composite.
    Cleared(Decision),
    Blocked(PolicyBlock),
}

impl Checked {
    /// The block, if this checkpoint blocked.
    pub fn into_block(self) -> Option<PolicyBlock> {
        match self {
            Checked::Cleared(_) => None,
            Checked::Blocked(block) => Some(block),
        }
    }
}

/// Lifecycle phase of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    PromptChecked,
    ToolsChecked,
    AwaitingProvider,
    ResponseChecked,
    Blocked,
}

/// Per-request checkpoint state machine.
///
/// Owned exclusively by the task handling the request; the only shared state
/// it touches is the read-only manager and the audit handle.
pub struct CheckpointDispatcher {
    manager: Arc<SecurityManager>,
    audit: Option<AuditLog>,
    tenant_id: String,
    correlation_id: String,
    phase: Phase,
}

impl CheckpointDispatcher {
    pub fn new(
        manager: Arc<SecurityManager>,
        audit: Option<AuditLog>,
        tenant_id: String,
        correlation_id: String,
    ) -> Self {
        Self {
            manager,
            audit,
            tenant_id,
            correlation_id,
            phase: Phase::Init,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    fn expect_phase(&self, allowed: &[Phase], op: &str) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(GateError::MalformedContext(format!(
                "{} called in phase {:?}",
                op, self.phase
            )))
        }
    }

    async fn check(&mut self, ctx: Context, kind: BlockKind) -> Checked {
        let evaluation = self.manager.evaluate_detailed(&ctx).await;
        let composite = evaluation.composite;

        match &self.audit {
            Some(audit) => audit.record(&self.tenant_id, &composite),
            None => audit::log_line(&composite),
        }

        if composite.verdict >= Verdict::Block {
            self.phase = Phase::Blocked;
            Checked::Blocked(PolicyBlock {
                decision: composite,
                kind,
            })
        } else {
            Checked::Cleared(composite)
        }
    }

    /// Check the outgoing prompt. On BLOCK the provider is never contacted.
    pub async fn check_prompt(&mut self, text: &str) -> Result<Checked> {
        self.expect_phase(&[Phase::Init], "check_prompt")?;
        let ctx = Context::prompt(&self.tenant_id, &self.correlation_id, text);
        let checked = self.check(ctx, BlockKind::Content).await;
        if matches!(checked, Checked::Cleared(_)) {
            self.phase = Phase::PromptChecked;
        }
        Ok(checked)
    }

    /// Check every declared tool definition. A BLOCK on any tool fails the
    /// whole request, not just that tool.
    pub async fn check_tool_definitions(&mut self, tools: &[ToolPayload]) -> Result<Checked> {
        self.expect_phase(&[Phase::PromptChecked], "check_tool_definitions")?;
        let mut last = None;
        for tool in tools {
            let ctx =
                Context::tool_definition(&self.tenant_id, &self.correlation_id, tool.clone());
            match self.check(ctx, BlockKind::Tool).await {
                Checked::Blocked(block) => return Ok(Checked::Blocked(block)),
                Checked::Cleared(decision) => last = Some(decision),
            }
        }
        self.phase = Phase::ToolsChecked;
        let cleared = last.unwrap_or_else(|| {
            // No tools declared: nothing to evaluate, synthesize the allow.
            let empty = ToolPayload {
                name: String::new(),
                arguments: serde_json::Value::Null,
            };
            Decision::allow(
                "composite",
                &Context::tool_definition(&self.tenant_id, &self.correlation_id, empty),
            )
        });
        Ok(Checked::Cleared(cleared))
    }

    /// Check a tool execution result supplied back by the client.
    pub async fn check_tool_response(&mut self, tool: ToolPayload) -> Result<Checked> {
        self.expect_phase(
            &[Phase::ToolsChecked, Phase::AwaitingProvider],
            "check_tool_response",
        )?;
        let ctx = Context::tool_response(&self.tenant_id, &self.correlation_id, tool);
        let checked = self.check(ctx, BlockKind::Content).await;
        if matches!(checked, Checked::Cleared(_)) {
            self.phase = Phase::AwaitingProvider;
        }
        Ok(checked)
    }

    /// Check a tool invocation emitted by the provider. A BLOCK prevents the
    /// call from being surfaced to the client.
    pub async fn check_tool_call(&mut self, tool: ToolPayload) -> Result<Checked> {
        self.expect_phase(
            &[Phase::ToolsChecked, Phase::AwaitingProvider],
            "check_tool_call",
        )?;
        let ctx = Context::tool_call(&self.tenant_id, &self.correlation_id, tool);
        let checked = self.check(ctx, BlockKind::Content).await;
        if matches!(checked, Checked::Cleared(_)) {
            self.phase = Phase::AwaitingProvider;
        }
        Ok(checked)
    }

    /// Check model response text. With `is_partial` the dispatcher stays in
    /// the provider phase so the stream interceptor can re-check as text
    /// accumulates; the final full-text check settles the request.
    pub async fn check_response(&mut self, text: &str, is_partial: bool) -> Result<Checked> {
        self.expect_phase(
            &[Phase::ToolsChecked, Phase::AwaitingProvider],
            "check_response",
        )?;
        let ctx =
            Context::model_response(&self.tenant_id, &self.correlation_id, text, is_partial);
        let checked = self.check(ctx, BlockKind::Content).await;
        if matches!(checked, Checked::Cleared(_)) {
            self.phase = if is_partial {
                Phase::AwaitingProvider
            } else {
                Phase::ResponseChecked
            };
        }
        Ok(checked)
    }
}
