//! Keyword trigger policy.
//!
//! Blocks any checkpoint whose text or tool payload contains a configured
//! trigger keyword (case-insensitive substring). Applies to every checkpoint
//! kind, which makes it the reference policy for exercising the full
//! interception pipeline end to end.

use serde::{Deserialize, Serialize};

use super::{CheckpointKind, Context, Decision, Policy, Reason, Verdict};

/// Configuration unit for [`KeywordPolicy`] (`[policies.keyword]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordPolicyConfig {
    /// Whether the policy participates in evaluation.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Trigger keywords, matched case-insensitively.
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for KeywordPolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keywords: Vec::new(),
        }
    }
}

/// Reference policy shape 1: substring match against `text` and tool names.
pub struct KeywordPolicy {
    keywords: Vec<String>,
}

impl KeywordPolicy {
    pub fn new(keywords: Vec<String>) -> Self {
        let keywords = keywords.into_iter().map(|k| k.to_lowercase()).collect();
        Self { keywords }
    }

    pub fn from_config(config: &KeywordPolicyConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self::new(config.keywords.clone()))
    }

    /// First trigger found in `haystack`, if any.
    fn matched_keyword(&self, haystack: &str) -> Option<&str> {
        let lower = haystack.to_lowercase();
        self.keywords
            .iter()
            .find(|k| lower.contains(k.as_str()))
            .map(|k| k.as_str())
    }
}

#[async_trait::async_trait]
impl Policy for KeywordPolicy {
    fn name(&self) -> &str {
        "keyword"
    }

    fn applies_to(&self, _kind: CheckpointKind) -> bool {
        true
    }

    async fn evaluate(&self, ctx: &Context) -> Decision {
        // Tool name gets its own message so a flagged tool is distinguishable
        // from flagged content in the audit trail.
        if let Some(tool) = &ctx.tool {
            if let Some(keyword) = self.matched_keyword(&tool.name) {
                return Decision::new(
                    self.name(),
                    ctx,
                    Verdict::Block,
                    Reason::PolicyViolation,
                    format!("Detected '{}' in tool name", keyword),
                );
            }
        }

        if let Some(keyword) = self.matched_keyword(&ctx.text) {
            return Decision::new(
                self.name(),
                ctx,
                Verdict::Block,
                Reason::PolicyViolation,
                format!("Detected '{}' in {}", keyword, ctx.kind),
            );
        }

        Decision::allow(self.name(), ctx)
    }
}
