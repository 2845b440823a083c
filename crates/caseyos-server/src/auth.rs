//! Request authentication: CSRF protection and the admin bearer token.
//!
//! All state-changing requests carry an `X-CSRF-Token` header, except the
//! whitelisted ingress surfaces (`/api/webhooks/*`, `/health*`). Admin
//! endpoints additionally require `Authorization: Bearer <ADMIN_TOKEN>`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::Response;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Paths exempt from CSRF checking.
const CSRF_EXEMPT_PREFIXES: &[&str] = &["/api/webhooks/", "/health"];

/// Derive the CSRF token from the configured secret.
///
/// Deterministic per deployment: the dashboard fetches it once via
/// `GET /api/csrf` and replays it on every state-changing request.
pub fn csrf_token(secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any size");
    mac.update(b"caseyos-csrf-v1");
    hex::encode(mac.finalize().into_bytes())
}

/// Compute the webhook signature for a raw body with a per-source secret.
pub fn webhook_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of hex-encoded MACs.
pub fn signature_matches(expected: &str, provided: &str) -> bool {
    let (Ok(expected), Ok(provided)) = (hex::decode(expected), hex::decode(provided)) else {
        return false;
    };
    if expected.len() != provided.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(provided.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

/// CSRF middleware for all routes.
pub async fn csrf_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let method = request.method();
    let path = request.uri().path();

    let state_changing = matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    let exempt = CSRF_EXEMPT_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix));

    if state_changing && !exempt {
        let expected = csrf_token(state.config.sending.effective_csrf_secret());
        let provided = request
            .headers()
            .get("x-csrf-token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !signature_matches(&expected, provided) {
            return Err(ApiError::Auth("missing or invalid CSRF token".to_string()));
        }
    }

    Ok(next.run(request).await)
}

/// Admin bearer-token middleware, applied to `/api/admin/*`.
pub async fn admin_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let configured = &state.config.sending.admin_token;
    if configured.is_empty() {
        return Err(ApiError::Auth("admin token not configured".to_string()));
    }

    let provided = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if provided != configured {
        return Err(ApiError::Auth("invalid admin token".to_string()));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csrf_token_is_deterministic_per_secret() {
        assert_eq!(csrf_token("secret-a"), csrf_token("secret-a"));
        assert_ne!(csrf_token("secret-a"), csrf_token("secret-b"));
    }

    #[test]
    fn webhook_signature_round_trip() {
        let sig = webhook_signature("hook-secret", b"{\"a\":1}");
        assert!(signature_matches(&sig, &sig));
        assert!(!signature_matches(
            &sig,
            &webhook_signature("hook-secret", b"{\"a\":2}")
        ));
        assert!(!signature_matches(&sig, "zz-not-hex"));
    }
}
