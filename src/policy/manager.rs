//! Security Manager: ordered policy set and verdict composition.
//!
//! The manager is constructed once at startup, shared read-only across all
//! request tasks behind an `Arc`, and never mutated afterwards — concurrent
//! evaluation needs no locking.
//!
//! Composition rule: invoke every applicable policy in insertion order,
//! discard `Allow` opinions, and return the decision with the maximum
//! severity verdict. Ties go to the first policy that reached the maximum.
//! Because the rule is `max` over a total order, the composite verdict is
//! independent of policy order whenever severities are distinct.

use std::sync::Arc;

use tracing::debug;

use super::{Context, Decision, Policy, Verdict};

/// Per-checkpoint evaluation result: the composite decision plus every
/// per-policy opinion, for audit.
#[derive(Debug)]
pub struct Evaluation {
    pub composite: Decision,
    /// One decision per applicable policy, in evaluation order.
    pub opinions: Vec<Decision>,
}

/// Holds the ordered policy list and composes decisions.
pub struct SecurityManager {
    policies: Vec<Arc<dyn Policy>>,
}

impl SecurityManager {
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
        }
    }

    /// Register a policy. Only valid before the manager is shared; insertion
    /// order is the tie-break order.
    pub fn add_policy(&mut self, policy: Arc<dyn Policy>) {
        self.policies.push(policy);
    }

    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    /// Evaluate every applicable policy and compose the result.
    ///
    /// Pure except for logging: repeated calls with an identical context
    /// produce the same verdicts, which is what lets the stream interceptor
    /// re-evaluate accumulated text as it grows.
    pub async fn evaluate_detailed(&self, ctx: &Context) -> Evaluation {
        let mut opinions = Vec::new();
        for policy in &self.policies {
            if !policy.applies_to(ctx.kind) {
                continue;
            }
            let decision = policy.evaluate(ctx).await;
            debug!(
                policy = policy.name(),
                checkpoint = %ctx.kind,
                verdict = %decision.verdict,
                "policy opinion"
            );
            opinions.push(decision);
        }

        // First policy reaching the max severity wins; its details and name
        // are surfaced. Full detail lives in the audit log.
        let mut composite: Option<&Decision> = None;
        for opinion in &opinions {
            if opinion.verdict == Verdict::Allow {
                continue;
            }
            match composite {
                Some(current) if current.verdict >= opinion.verdict => {}
                _ => composite = Some(opinion),
            }
        }

        let composite = composite
            .cloned()
            .unwrap_or_else(|| Decision::allow("composite", ctx));

        Evaluation {
            composite,
            opinions,
        }
    }

    /// Evaluate and return only the composite decision.
    pub async fn evaluate(&self, ctx: &Context) -> Decision {
        self.evaluate_detailed(ctx).await.composite
    }
}

impl Default for SecurityManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{CheckpointKind, Reason};

    /// A policy with a fixed verdict, for composition tests.
    struct FixedPolicy {
        name: String,
        verdict: Verdict,
    }

    impl FixedPolicy {
        fn new(name: &str, verdict: Verdict) -> Arc<dyn Policy> {
            Arc::new(Self {
                name: name.to_string(),
                verdict,
            })
        }
    }

    #[async_trait::async_trait]
    impl Policy for FixedPolicy {
        fn name(&self) -> &str {
            &self.name
        }

        fn applies_to(&self, _kind: CheckpointKind) -> bool {
            true
        }

        async fn evaluate(&self, ctx: &Context) -> Decision {
            if self.verdict == Verdict::Allow {
                Decision::allow(self.name(), ctx)
            } else {
                Decision::new(
                    self.name(),
                    ctx,
                    self.verdict,
                    Reason::PolicyViolation,
                    format!("fixed {}", self.verdict),
                )
            }
        }
    }

    fn manager_of(verdicts: &[(&str, Verdict)]) -> SecurityManager {
        let mut manager = SecurityManager::new();
        for (name, verdict) in verdicts {
            manager.add_policy(FixedPolicy::new(name, *verdict));
        }
        manager
    }

    fn ctx() -> Context {
        Context::prompt("tenant", "corr", "some text")
    }

    #[tokio::test]
    async fn empty_manager_allows() {
        let manager = SecurityManager::new();
        let d = manager.evaluate(&ctx()).await;
        assert_eq!(d.verdict, Verdict::Allow);
        assert_eq!(d.reason, Reason::None);
    }

    #[tokio::test]
    async fn all_allow_composes_to_allow_with_reason_none() {
        let manager = manager_of(&[("a", Verdict::Allow), ("b", Verdict::Allow)]);
        let d = manager.evaluate(&ctx()).await;
        assert_eq!(d.verdict, Verdict::Allow);
        assert_eq!(d.reason, Reason::None);
        assert_eq!(d.policy_name, "composite");
    }

    #[tokio::test]
    async fn max_severity_wins() {
        let manager = manager_of(&[
            ("logger", Verdict::Log),
            ("confirmer", Verdict::Confirm),
        ]);
        let d = manager.evaluate(&ctx()).await;
        assert_eq!(d.verdict, Verdict::Confirm);
        assert_eq!(d.policy_name, "confirmer");
    }

    #[tokio::test]
    async fn block_dominates_everything() {
        let manager = manager_of(&[
            ("a", Verdict::Allow),
            ("b", Verdict::Log),
            ("c", Verdict::Block),
            ("d", Verdict::Confirm),
        ]);
        let d = manager.evaluate(&ctx()).await;
        assert_eq!(d.verdict, Verdict::Block);
        assert_eq!(d.policy_name, "c");
    }

    #[tokio::test]
    async fn composition_is_order_independent_for_distinct_severities() {
        let forward = manager_of(&[("log", Verdict::Log), ("block", Verdict::Block)]);
        let reverse = manager_of(&[("block", Verdict::Block), ("log", Verdict::Log)]);

        let d1 = forward.evaluate(&ctx()).await;
        let d2 = reverse.evaluate(&ctx()).await;
        assert_eq!(d1.verdict, d2.verdict);
        assert_eq!(d1.policy_name, "block");
        assert_eq!(d2.policy_name, "block");
    }

    #[tokio::test]
    async fn tie_broken_by_evaluation_order() {
        let manager = manager_of(&[("first", Verdict::Log), ("second", Verdict::Log)]);
        let d = manager.evaluate(&ctx()).await;
        assert_eq!(d.verdict, Verdict::Log);
        assert_eq!(d.policy_name, "first");
    }

    #[tokio::test]
    async fn opinions_carry_every_applicable_policy() {
        let manager = manager_of(&[("a", Verdict::Allow), ("b", Verdict::Log)]);
        let eval = manager.evaluate_detailed(&ctx()).await;
        assert_eq!(eval.opinions.len(), 2);
        assert_eq!(eval.composite.verdict, Verdict::Log);
    }

    /// Applies only to prompts; manager must skip it elsewhere.
    struct PromptOnly;

    #[async_trait::async_trait]
    impl Policy for PromptOnly {
        fn name(&self) -> &str {
            "prompt-only"
        }

        fn applies_to(&self, kind: CheckpointKind) -> bool {
            kind == CheckpointKind::Prompt
        }

        async fn evaluate(&self, ctx: &Context) -> Decision {
            Decision::new(
                self.name(),
                ctx,
                Verdict::Block,
                Reason::PolicyViolation,
                "always blocks prompts",
            )
        }
    }

    #[tokio::test]
    async fn non_applicable_policies_are_skipped() {
        let mut manager = SecurityManager::new();
        manager.add_policy(Arc::new(PromptOnly));

        let d = manager
            .evaluate(&Context::model_response("t", "c", "text", false))
            .await;
        assert_eq!(d.verdict, Verdict::Allow);

        let d = manager.evaluate(&ctx()).await;
        assert_eq!(d.verdict, Verdict::Block);
    }

    #[tokio::test]
    async fn evaluation_is_idempotent_for_identical_context() {
        let manager = manager_of(&[("b", Verdict::Block)]);
        let c = ctx();
        let d1 = manager.evaluate(&c).await;
        let d2 = manager.evaluate(&c).await;
        assert_eq!(d1.verdict, d2.verdict);
        assert_eq!(d1.details, d2.details);
    }
}
