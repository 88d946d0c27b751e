//! Rate limiting middleware for HTTP routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, warn};

use super::headers::rate_limit_headers;
use crate::error::TollgateError;
use crate::ratelimit::{client_identifier, AuthenticatedUser, Gatekeeper};

/// Middleware state binding a route to one named policy.
#[derive(Clone, Debug)]
pub struct PolicyGuard {
    gatekeeper: Gatekeeper,
    policy: String,
}

impl PolicyGuard {
    /// Guard a route with the named policy.
    pub fn new(gatekeeper: Gatekeeper, policy: impl Into<String>) -> Self {
        Self {
            gatekeeper,
            policy: policy.into(),
        }
    }
}

/// Admit or reject a request before it reaches the route handler.
///
/// Rejections answer `429` with `{"error": <policy message>}`. Admitted
/// responses pass through with the rate limit headers added. Store faults
/// (when not failing open) answer `500`.
pub async fn enforce(State(guard): State<PolicyGuard>, request: Request, next: Next) -> Response {
    let limiter = match guard.gatekeeper.limiter(&guard.policy) {
        Ok(limiter) => limiter,
        Err(err) => return internal_error(err),
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identifier = client_identifier(
        request.headers(),
        peer,
        request.extensions().get::<AuthenticatedUser>(),
    );

    let decision = match limiter.check(&identifier).await {
        Ok(decision) => decision,
        Err(err) => return internal_error(err.into()),
    };

    let headers = rate_limit_headers(&decision, limiter.now_ms());

    if !decision.allowed {
        debug!(
            policy = %guard.policy,
            identifier = %identifier,
            path = %request.uri().path(),
            "Request rejected by rate limit"
        );
        let message = decision
            .message
            .unwrap_or_else(|| limiter.policy().message().to_string());
        return (
            StatusCode::TOO_MANY_REQUESTS,
            headers,
            Json(json!({ "error": message })),
        )
            .into_response();
    }

    let mut response = next.run(request).await;
    response.headers_mut().extend(headers);
    response
}

fn internal_error(err: TollgateError) -> Response {
    // A guard naming a missing policy is a server misconfiguration, not a 404.
    let err = match err {
        TollgateError::UnknownPolicy(_) => TollgateError::Config(err.to_string()),
        other => other,
    };
    err.into_response()
}

/// Middleware state for the admin surface: the bearer token it accepts.
///
/// With no token configured every admin request is refused.
#[derive(Clone, Default)]
pub struct AdminGuard {
    token: Option<Arc<str>>,
}

impl std::fmt::Debug for AdminGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminGuard")
            .field("configured", &self.token.is_some())
            .finish()
    }
}

impl AdminGuard {
    /// Accept `Authorization: Bearer <token>`. Empty tokens are ignored.
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: token.map(str::trim).filter(|t| !t.is_empty()).map(Arc::from),
        }
    }

    fn admits(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.token.as_deref() else {
            return false;
        };

        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|presented| tokens_match(presented.trim(), expected))
    }
}

/// Refuse admin requests that do not carry the configured bearer token.
///
/// Runs before the admin quota so that refused calls do not spend it.
pub async fn require_admin(
    State(guard): State<AdminGuard>,
    request: Request,
    next: Next,
) -> Response {
    if !guard.admits(request.headers()) {
        warn!(
            path = %request.uri().path(),
            configured = guard.token.is_some(),
            "Admin request refused"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response();
    }

    next.run(request).await
}

// Constant time in the length of `expected`.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_admin_guard_accepts_configured_token() {
        let guard = AdminGuard::new(Some("s3cret"));
        assert!(guard.admits(&bearer("s3cret")));
        assert!(!guard.admits(&bearer("s3cre")));
        assert!(!guard.admits(&bearer("s3cret!")));
        assert!(!guard.admits(&HeaderMap::new()));
    }

    #[test]
    fn test_admin_guard_without_token_refuses_all() {
        assert!(!AdminGuard::new(None).admits(&bearer("anything")));
        assert!(!AdminGuard::new(Some("  ")).admits(&bearer("")));
    }
}
