//! RPC bearer-token authorization and constant-time secret comparison.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use slabot_core::config::RpcAuthConfig;

/// Authorization tiers, nested: admin ⊃ manager ⊃ authed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Authed,
    Manager,
    Admin,
}

/// Compare two secrets without short-circuiting on the first differing
/// byte. Both sides are hashed first so length differences leak nothing.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let da = Sha256::digest(a.as_bytes());
    let db = Sha256::digest(b.as_bytes());
    da.iter().zip(db.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check the `Authorization: Bearer …` header against the configured
/// tier tokens. When no tokens are configured at all, auth is disabled
/// (development setups).
pub fn authorize(auth: &RpcAuthConfig, headers: &HeaderMap, required: Tier) -> bool {
    if auth.authed_token.is_none() && auth.manager_token.is_none() && auth.admin_token.is_none() {
        return true;
    }

    let Some(token) = bearer_token(headers) else {
        return false;
    };

    let admin = matches_token(auth.admin_token.as_deref(), token);
    let manager = matches_token(auth.manager_token.as_deref(), token);
    let authed = matches_token(auth.authed_token.as_deref(), token);

    match required {
        Tier::Admin => admin,
        Tier::Manager => admin || manager,
        Tier::Authed => admin || manager || authed,
    }
}

fn matches_token(expected: Option<&str>, got: &str) -> bool {
    expected.is_some_and(|e| constant_time_eq(e, got))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config() -> RpcAuthConfig {
        RpcAuthConfig {
            authed_token: Some("a-token".to_string()),
            manager_token: Some("m-token".to_string()),
            admin_token: Some("root-token".to_string()),
        }
    }

    fn headers(token: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        h
    }

    #[test]
    fn constant_time_eq_agrees_with_equality() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "Secret"));
        assert!(!constant_time_eq("secret", "secret2"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn tiers_nest_upward() {
        let cfg = config();
        assert!(authorize(&cfg, &headers("root-token"), Tier::Authed));
        assert!(authorize(&cfg, &headers("root-token"), Tier::Admin));
        assert!(authorize(&cfg, &headers("m-token"), Tier::Authed));
        assert!(authorize(&cfg, &headers("m-token"), Tier::Manager));
        assert!(!authorize(&cfg, &headers("m-token"), Tier::Admin));
        assert!(authorize(&cfg, &headers("a-token"), Tier::Authed));
        assert!(!authorize(&cfg, &headers("a-token"), Tier::Manager));
    }

    #[test]
    fn missing_or_wrong_token_is_rejected() {
        let cfg = config();
        assert!(!authorize(&cfg, &HeaderMap::new(), Tier::Authed));
        assert!(!authorize(&cfg, &headers("wrong"), Tier::Authed));
    }

    #[test]
    fn no_tokens_configured_disables_auth() {
        let cfg = RpcAuthConfig::default();
        assert!(authorize(&cfg, &HeaderMap::new(), Tier::Admin));
    }
}
