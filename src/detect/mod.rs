//! Entity detection seam.
//!
//! The NLP/PII recognition model is an external dependency: PromptGate only
//! sees typed [`Finding`]s coming back from an [`EntityDetector`]. The
//! [`patterns`] submodule ships a regex reference detector suitable for
//! tests and small deployments.

pub mod patterns;

pub use patterns::RegexDetector;

use serde::Serialize;

use crate::error::Result;

/// A single detection produced by an [`EntityDetector`].
///
/// Findings never cross the policy boundary; policies translate them into
/// decisions.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    /// Entity category name, e.g. `EMAIL_ADDRESS`, `PERSON`, `US_SSN`.
    pub category: String,
    /// Detector confidence in `[0.0, 1.0]`.
    pub confidence: f32,
    /// Number of matches for this category in the scanned text.
    pub count: usize,
}

/// Trait for entity detectors that scan text for sensitive categories.
///
/// Implementations must be `Send + Sync` for concurrent use from many
/// sessions, and must be idempotent for identical input. Failures (detector
/// service down, timeout) surface as `GateError::PolicyUnavailable` and are
/// resolved by the owning policy's fail mode, never by the detector itself.
#[async_trait::async_trait]
pub trait EntityDetector: Send + Sync {
    /// Scan `text` and return one finding per detected category.
    async fn detect(&self, text: &str) -> Result<Vec<Finding>>;

    /// Detector name for logs (e.g., `"regex"`).
    fn name(&self) -> &str;
}
