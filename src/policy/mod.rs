//! Policy evaluation engine.
//!
//! A [`Policy`] is a unit of evaluation: given a checkpoint [`Context`], it
//! produces a [`Decision`] or a safe "no opinion" (verdict `Allow`, reason
//! `None`). The [`SecurityManager`](manager::SecurityManager) holds an
//! ordered set of policies and composes their decisions into one composite
//! per checkpoint.
//!
//! Two reference policies ship with the crate:
//!
//! - [`keyword::KeywordPolicy`] — substring/keyword match against text and
//!   tool payloads
//! - [`entity::EntityPolicy`] — entity-typed detection with a per-category
//!   verdict table, confidence threshold, and per-checkpoint toggles

pub mod decision;
pub mod entity;
pub mod keyword;
pub mod manager;

pub use decision::{CheckpointKind, Context, Decision, Reason, ToolPayload, Verdict};

/// A pluggable policy.
///
/// Implementations hold only configuration — no per-evaluation state — and
/// must be safe to invoke concurrently from many sessions. `evaluate` must
/// not panic for well-formed input; internal failures map to a decision with
/// reason [`Reason::Unavailable`] and the policy's configured fail-open or
/// fail-closed verdict.
#[async_trait::async_trait]
pub trait Policy: Send + Sync {
    /// Policy name surfaced in decisions and audit records.
    fn name(&self) -> &str;

    /// Whether this policy inspects the given checkpoint kind. The manager
    /// skips non-applicable policies entirely.
    fn applies_to(&self, kind: CheckpointKind) -> bool;

    /// Evaluate one checkpoint context.
    async fn evaluate(&self, ctx: &Context) -> Decision;
}
