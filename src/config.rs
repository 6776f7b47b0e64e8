//! TOML configuration types for PromptGate.
//!
//! The top-level [`AppConfig`] is deserialized from `promptgate.toml` and
//! contains sections for the server, upstream provider base URLs, streaming
//! limits, the audit store, and one configuration unit per policy.
//!
//! # Example `promptgate.toml`
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:8080"
//!
//! [policies.keyword]
//! enabled = true
//! keywords = ["capsem_block"]
//!
//! [policies.entity]
//! enabled = true
//! confidence_threshold = 0.5
//!
//! [policies.entity.categories]
//! EMAIL_ADDRESS = "block"
//! PERSON = "log"
//! ```

use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::detect::EntityDetector;
use crate::error::{GateError, Result};
use crate::policy::entity::{EntityPolicy, EntityPolicyConfig};
use crate::policy::keyword::{KeywordPolicy, KeywordPolicyConfig};
use crate::policy::manager::SecurityManager;

/// Server configuration (`[server]` section).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., `"127.0.0.1:8080"`).
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Upstream provider base URLs (`[upstream]` section). Overridable so tests
/// can point at a stub server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_openai_base")]
    pub openai_base_url: String,
    #[serde(default = "default_gemini_base")]
    pub gemini_base_url: String,
}

fn default_openai_base() -> String {
    "https://api.openai.com".to_string()
}

fn default_gemini_base() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            openai_base_url: default_openai_base(),
            gemini_base_url: default_gemini_base(),
        }
    }
}

/// Streaming interception limits (`[stream]` section).
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Maximum unflushed bytes before a forced boundary evaluation. The
    /// interceptor never buffers past this without re-running policy.
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
}

fn default_max_buffer_bytes() -> usize {
    16 * 1024
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: default_max_buffer_bytes(),
        }
    }
}

/// Audit store configuration (`[audit]` section).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AuditConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Database file path; defaults to `promptgate.db` next to the config.
    #[serde(default)]
    pub db_path: Option<String>,
}

/// Per-policy configuration units (`[policies.*]` sections).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PoliciesConfig {
    #[serde(default)]
    pub keyword: Option<KeywordPolicyConfig>,
    #[serde(default)]
    pub entity: Option<EntityPolicyConfig>,
}

/// Top-level application configuration deserialized from `promptgate.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub policies: PoliciesConfig,
}

impl AppConfig {
    /// Load and parse the configuration from a TOML file at the given path.
    ///
    /// Before parsing, `${VAR}` and `$VAR` placeholders in the TOML text are
    /// replaced with the corresponding environment variable values. An error
    /// is returned if a referenced variable is not set.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let content = substitute_env_vars(&content)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Build the immutable policy list from the per-policy config units.
    ///
    /// Called once at startup; the returned manager is shared read-only
    /// across request tasks.
    pub fn build_manager(&self, detector: Arc<dyn EntityDetector>) -> SecurityManager {
        let mut manager = SecurityManager::new();
        if let Some(keyword_cfg) = &self.policies.keyword {
            if let Some(policy) = KeywordPolicy::from_config(keyword_cfg) {
                manager.add_policy(Arc::new(policy));
            }
        }
        if let Some(entity_cfg) = &self.policies.entity {
            if let Some(policy) = EntityPolicy::from_config(entity_cfg, detector) {
                manager.add_policy(Arc::new(policy));
            }
        }
        manager
    }
}

/// Replace `${VAR_NAME}` and `$VAR_NAME` placeholders with environment
/// variable values.
///
/// Returns an error containing the variable name if the variable is not set.
fn substitute_env_vars(input: &str) -> Result<String> {
    // Match ${VAR_NAME} (braces form)
    let re_braces = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    // Match $VAR_NAME (no braces, uppercase + underscore only to avoid false positives)
    let re_bare = Regex::new(r"\$([A-Z_][A-Z0-9_]*)").unwrap();

    let mut result = input.to_string();

    for cap in re_braces.captures_iter(input) {
        let var_name = &cap[1];
        let value =
            std::env::var(var_name).map_err(|_| GateError::ConfigEnvVar(var_name.to_string()))?;
        result = result.replace(&cap[0], &value);
    }

    let intermediate = result.clone();
    for cap in re_bare.captures_iter(&intermediate) {
        let var_name = &cap[1];
        let value =
            std::env::var(var_name).map_err(|_| GateError::ConfigEnvVar(var_name.to_string()))?;
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}
