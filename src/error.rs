use thiserror::Error;

/// Unified error type for the PromptGate library.
///
/// A policy BLOCK is deliberately *not* an error variant — it is an expected
/// outcome surfaced as a typed value ([`PolicyBlock`](crate::proxy::dispatch::PolicyBlock))
/// so callers can distinguish "blocked by policy" from "something failed".
#[derive(Debug, Error)]
pub enum GateError {
    /// An external detector was unreachable or timed out. Resolved per the
    /// owning policy's fail-open/fail-closed configuration, never raised past
    /// the Security Manager.
    #[error("Policy detector unavailable: {0}")]
    PolicyUnavailable(String),

    /// Programmer error building a checkpoint Context (e.g., checks issued
    /// out of order). The request fails closed.
    #[error("Malformed checkpoint context: {0}")]
    MalformedContext(String),

    /// Upstream provider returned an error. Passed through to the caller
    /// unchanged; not a policy concern.
    #[error("Upstream provider error: status {status}")]
    Upstream { status: u16, body: String },

    /// Client disconnected or the stream was forcibly terminated after a
    /// post-flush block. Resource cleanup only.
    #[error("Stream aborted: {0}")]
    StreamAborted(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config env var not set: {0}")]
    ConfigEnvVar(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Proxy error: {0}")]
    Proxy(String),
}

pub type Result<T> = std::result::Result<T, GateError>;
