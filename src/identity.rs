//! Tenant identity derivation.
//!
//! The inbound credential (API key, bearer token) is forwarded to the
//! upstream provider and never persisted; for audit correlation the proxy
//! keeps only a one-way hash. Same credential, same process, same id.

use sha2::{Digest, Sha256};

/// Length of the hex tenant id.
const TENANT_ID_LEN: usize = 16;

/// Derive a stable, non-reversible tenant id from a credential.
///
/// A `Bearer ` prefix is stripped so the same key yields the same id
/// regardless of header framing. The id has no effect on policy decisions.
pub fn tenant_id(credential: &str) -> String {
    let key = credential
        .strip_prefix("Bearer ")
        .unwrap_or(credential)
        .trim();
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..TENANT_ID_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_credential_same_id() {
        assert_eq!(tenant_id("sk-test-key"), tenant_id("sk-test-key"));
    }

    #[test]
    fn different_credentials_differ() {
        assert_ne!(tenant_id("sk-key-a"), tenant_id("sk-key-b"));
    }

    #[test]
    fn id_is_16_hex_chars() {
        let id = tenant_id("some-credential");
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn bearer_prefix_is_stripped() {
        assert_eq!(tenant_id("Bearer sk-test-key"), tenant_id("sk-test-key"));
    }

    #[test]
    fn id_is_not_the_credential() {
        let credential = "sk-super-secret";
        assert!(!tenant_id(credential).contains("secret"));
    }
}
