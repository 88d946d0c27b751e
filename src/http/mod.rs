//! HTTP surface: rate limiting middleware, admin routes and the server.

mod headers;
mod middleware;
mod server;

pub use headers::{rate_limit_headers, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
pub use middleware::{enforce, require_admin, AdminGuard, PolicyGuard};
pub use server::HttpServer;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::error::TollgateError;

impl IntoResponse for TollgateError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            TollgateError::UnknownPolicy(name) => {
                (StatusCode::NOT_FOUND, format!("Unknown rate limit policy: {name}"))
            }
            _ => {
                error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
