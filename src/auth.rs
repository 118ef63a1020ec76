//! Identity extraction seam. MCP requests carry a caller
//! identity header that resolves to a `user_id`, which in turn selects
//! which per-user repository and Index to operate against. SAML and
//! other enterprise identity extraction is explicitly out of scope; this
//! module only defines the trait boundary and a static/dev
//! implementation good enough for local development and tests.

use anyhow::{anyhow, Result};
use axum::http::HeaderMap;

const API_KEY_HEADER: &str = "X-Cairn-User";
const AUTHORIZATION_HEADER: &str = "Authorization";
const BEARER_PREFIX: &str = "Bearer ";

/// Resolves an inbound request to the `user_id` whose repository it
/// should operate against.
pub trait IdentityProvider: Send + Sync {
    fn identify(&self, headers: &HeaderMap) -> Result<String>;
}

fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(API_KEY_HEADER) {
        if let Ok(token) = value.to_str() {
            return Some(token.to_string());
        }
    }

    if let Some(value) = headers.get(AUTHORIZATION_HEADER) {
        if let Ok(auth) = value.to_str() {
            if let Some(token) = auth.strip_prefix(BEARER_PREFIX) {
                return Some(token.to_string());
            }
        }
    }

    None
}

/// Accepts any bearer token or `X-Cairn-User` header value as-is and uses
/// it directly as the `user_id`. Suitable for local development, single
/// tenant deployments, and tests — not for production multi-tenant use.
pub struct StaticIdentityProvider {
    default_user_id: Option<String>,
}

impl StaticIdentityProvider {
    pub fn new(default_user_id: Option<String>) -> Self {
        Self { default_user_id }
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn identify(&self, headers: &HeaderMap) -> Result<String> {
        if let Some(token) = extract_token(headers) {
            return Ok(token);
        }

        self.default_user_id
            .clone()
            .ok_or_else(|| anyhow!("missing identity: no '{API_KEY_HEADER}' or bearer token, and no default user configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_user_id_from_custom_header() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, "alice".parse().unwrap());
        let provider = StaticIdentityProvider::new(None);
        assert_eq!(provider.identify(&headers).unwrap(), "alice");
    }

    #[test]
    fn reads_user_id_from_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION_HEADER, "Bearer bob".parse().unwrap());
        let provider = StaticIdentityProvider::new(None);
        assert_eq!(provider.identify(&headers).unwrap(), "bob");
    }

    #[test]
    fn falls_back_to_default_user_when_no_header_present() {
        let headers = HeaderMap::new();
        let provider = StaticIdentityProvider::new(Some("dev".to_string()));
        assert_eq!(provider.identify(&headers).unwrap(), "dev");
    }

    #[test]
    fn errors_without_header_or_default() {
        let headers = HeaderMap::new();
        let provider = StaticIdentityProvider::new(None);
        assert!(provider.identify(&headers).is_err());
    }
}
