//! Entity-typed detection policy.
//!
//! Wraps an [`EntityDetector`] and maps each detected category independently
//! to a verdict via a per-category table. Categories missing from the table
//! are not checked. A confidence threshold discards weak findings, and
//! per-checkpoint toggles restrict which traffic is scanned.
//!
//! The detector call is awaited within the owning request task under a
//! per-call timeout; on timeout or detector failure the policy's fail mode
//! decides the verdict (`Reason::Unavailable`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{CheckpointKind, Context, Decision, Policy, Reason, Verdict};
use crate::detect::EntityDetector;

/// Behavior when the detector cannot complete an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Unavailable detector yields `Allow`.
    Open,
    /// Unavailable detector yields `Block`. Default, for safety-critical
    /// categories.
    #[default]
    Closed,
}

/// Configuration unit for [`EntityPolicy`] (`[policies.entity]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityPolicyConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Category name → verdict. Omitted categories are not checked.
    #[serde(default)]
    pub categories: HashMap<String, Verdict>,
    /// Findings below this confidence are discarded.
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_enabled")]
    pub scan_prompts: bool,
    #[serde(default = "default_enabled")]
    pub scan_tool_args: bool,
    #[serde(default = "default_enabled")]
    pub scan_responses: bool,
    #[serde(default = "default_enabled")]
    pub scan_tool_responses: bool,
    #[serde(default)]
    pub fail_mode: FailMode,
    /// Per-call detector timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub detector_timeout_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_threshold() -> f32 {
    0.5
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Default for EntityPolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            categories: HashMap::new(),
            confidence_threshold: default_threshold(),
            scan_prompts: true,
            scan_tool_args: true,
            scan_responses: true,
            scan_tool_responses: true,
            fail_mode: FailMode::Closed,
            detector_timeout_ms: default_timeout_ms(),
        }
    }
}

/// Reference policy shape 2: entity-typed detector with per-category verdict
/// mapping.
pub struct EntityPolicy {
    config: EntityPolicyConfig,
    detector: Arc<dyn EntityDetector>,
}

impl EntityPolicy {
    pub fn new(config: EntityPolicyConfig, detector: Arc<dyn EntityDetector>) -> Self {
        Self { config, detector }
    }

    pub fn from_config(
        config: &EntityPolicyConfig,
        detector: Arc<dyn EntityDetector>,
    ) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self::new(config.clone(), detector))
    }

    fn unavailable(&self, ctx: &Context, cause: &str) -> Decision {
        let verdict = match self.config.fail_mode {
            FailMode::Open => Verdict::Allow,
            FailMode::Closed => Verdict::Block,
        };
        warn!(
            policy = self.name(),
            detector = self.detector.name(),
            cause,
            "detector unavailable, failing {:?}",
            self.config.fail_mode
        );
        Decision::new(
            self.name(),
            ctx,
            verdict,
            Reason::Unavailable,
            format!("Detector '{}' unavailable: {}", self.detector.name(), cause),
        )
    }
}

#[async_trait::async_trait]
impl Policy for EntityPolicy {
    fn name(&self) -> &str {
        "entity"
    }

    fn applies_to(&self, kind: CheckpointKind) -> bool {
        match kind {
            CheckpointKind::Prompt => self.config.scan_prompts,
            CheckpointKind::ToolCall => self.config.scan_tool_args,
            CheckpointKind::ModelResponse => self.config.scan_responses,
            CheckpointKind::ToolResponse => self.config.scan_tool_responses,
            // Tool declarations carry schemas, not content; keyword territory.
            CheckpointKind::ToolDefinition => false,
        }
    }

    async fn evaluate(&self, ctx: &Context) -> Decision {
        let timeout = Duration::from_millis(self.config.detector_timeout_ms);
        let findings = match tokio::time::timeout(timeout, self.detector.detect(&ctx.text)).await {
            Err(_) => return self.unavailable(ctx, "timeout"),
            Ok(Err(e)) => return self.unavailable(ctx, &e.to_string()),
            Ok(Ok(findings)) => findings,
        };

        let mut verdict = Verdict::Allow;
        let mut flagged: Vec<String> = Vec::new();
        for finding in findings {
            if finding.confidence < self.config.confidence_threshold {
                continue;
            }
            let Some(mapped) = self.config.categories.get(&finding.category) else {
                continue;
            };
            if *mapped > Verdict::Allow {
                flagged.push(format!("{} (x{})", finding.category, finding.count));
            }
            verdict = verdict.max(*mapped);
        }

        if verdict == Verdict::Allow {
            return Decision::allow(self.name(), ctx);
        }

        Decision::new(
            self.name(),
            ctx,
            verdict,
            Reason::SensitiveData,
            format!("Detected entities: {}", flagged.join(", ")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Finding, RegexDetector};
    use crate::error::{GateError, Result};

    fn config(categories: &[(&str, Verdict)]) -> EntityPolicyConfig {
        EntityPolicyConfig {
            categories: categories
                .iter()
                .map(|(c, v)| (c.to_string(), *v))
                .collect(),
            ..Default::default()
        }
    }

    fn regex_policy(categories: &[(&str, Verdict)]) -> EntityPolicy {
        EntityPolicy::new(config(categories), Arc::new(RegexDetector::new()))
    }

    #[tokio::test]
    async fn blocks_mapped_category() {
        let policy = regex_policy(&[("EMAIL_ADDRESS", Verdict::Block)]);
        let ctx = Context::model_response("t", "c", "reach me at user@example.com", false);
        let d = policy.evaluate(&ctx).await;
        assert_eq!(d.verdict, Verdict::Block);
        assert_eq!(d.reason, Reason::SensitiveData);
        assert!(d.details.contains("EMAIL_ADDRESS"));
    }

    #[tokio::test]
    async fn unmapped_category_is_not_checked() {
        let policy = regex_policy(&[("US_SSN", Verdict::Block)]);
        let ctx = Context::model_response("t", "c", "mail user@example.com", false);
        let d = policy.evaluate(&ctx).await;
        assert_eq!(d.verdict, Verdict::Allow);
    }

    #[tokio::test]
    async fn log_mapping_yields_log_verdict() {
        let policy = regex_policy(&[("EMAIL_ADDRESS", Verdict::Log)]);
        let ctx = Context::model_response("t", "c", "mail user@example.com", false);
        let d = policy.evaluate(&ctx).await;
        assert_eq!(d.verdict, Verdict::Log);
    }

    #[tokio::test]
    async fn max_verdict_wins_across_categories() {
        let policy = regex_policy(&[
            ("EMAIL_ADDRESS", Verdict::Log),
            ("US_SSN", Verdict::Block),
        ]);
        let ctx = Context::model_response(
            "t",
            "c",
            "mail user@example.com, SSN 078-05-1120",
            false,
        );
        let d = policy.evaluate(&ctx).await;
        assert_eq!(d.verdict, Verdict::Block);
    }

    #[tokio::test]
    async fn confidence_threshold_discards_weak_findings() {
        // PHONE_NUMBER confidence is 0.55 in the reference detector.
        let mut cfg = config(&[("PHONE_NUMBER", Verdict::Block)]);
        cfg.confidence_threshold = 0.9;
        let policy = EntityPolicy::new(cfg, Arc::new(RegexDetector::new()));
        let ctx = Context::prompt("t", "c", "call +1 415 555 0100");
        let d = policy.evaluate(&ctx).await;
        assert_eq!(d.verdict, Verdict::Allow);
    }

    #[tokio::test]
    async fn checkpoint_toggles_restrict_scanning() {
        let mut cfg = config(&[("EMAIL_ADDRESS", Verdict::Block)]);
        cfg.scan_prompts = false;
        let policy = EntityPolicy::new(cfg, Arc::new(RegexDetector::new()));
        assert!(!policy.applies_to(CheckpointKind::Prompt));
        assert!(policy.applies_to(CheckpointKind::ModelResponse));
        assert!(!policy.applies_to(CheckpointKind::ToolDefinition));
    }

    struct FailingDetector;

    #[async_trait::async_trait]
    impl EntityDetector for FailingDetector {
        async fn detect(&self, _text: &str) -> Result<Vec<Finding>> {
            Err(GateError::PolicyUnavailable("service down".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct HangingDetector;

    #[async_trait::async_trait]
    impl EntityDetector for HangingDetector {
        async fn detect(&self, _text: &str) -> Result<Vec<Finding>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    #[tokio::test]
    async fn detector_failure_fails_closed_by_default() {
        let policy = EntityPolicy::new(
            config(&[("EMAIL_ADDRESS", Verdict::Block)]),
            Arc::new(FailingDetector),
        );
        let ctx = Context::prompt("t", "c", "anything");
        let d = policy.evaluate(&ctx).await;
        assert_eq!(d.verdict, Verdict::Block);
        assert_eq!(d.reason, Reason::Unavailable);
    }

    #[tokio::test]
    async fn detector_failure_fails_open_when_configured() {
        let mut cfg = config(&[("EMAIL_ADDRESS", Verdict::Block)]);
        cfg.fail_mode = FailMode::Open;
        let policy = EntityPolicy::new(cfg, Arc::new(FailingDetector));
        let ctx = Context::prompt("t", "c", "anything");
        let d = policy.evaluate(&ctx).await;
        assert_eq!(d.verdict, Verdict::Allow);
        assert_eq!(d.reason, Reason::Unavailable);
    }

    #[tokio::test]
    async fn detector_timeout_respects_fail_mode() {
        let mut cfg = config(&[("EMAIL_ADDRESS", Verdict::Block)]);
        cfg.detector_timeout_ms = 20;
        let policy = EntityPolicy::new(cfg, Arc::new(HangingDetector));
        let ctx = Context::prompt("t", "c", "anything");
        let d = policy.evaluate(&ctx).await;
        assert_eq!(d.verdict, Verdict::Block);
        assert_eq!(d.reason, Reason::Unavailable);
        assert!(d.details.contains("timeout"));
    }
}
