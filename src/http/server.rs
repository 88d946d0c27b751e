//! HTTP server and route table.

use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{enforce, require_admin, AdminGuard, PolicyGuard};
use crate::error::{Result, TollgateError};
use crate::ratelimit::{epoch_ms_to_utc, Gatekeeper, Status};

/// HTTP server for the rate limited API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Policy lookup and limiter construction
    gatekeeper: Gatekeeper,
    /// Credentials for the admin routes
    admin: AdminGuard,
}

impl HttpServer {
    /// Create a new HTTP server.
    ///
    /// The admin routes refuse every request until a token is set with
    /// [`HttpServer::with_admin_token`].
    pub fn new(addr: SocketAddr, gatekeeper: Gatekeeper) -> Self {
        Self {
            addr,
            gatekeeper,
            admin: AdminGuard::default(),
        }
    }

    /// Accept `Authorization: Bearer <token>` on the admin routes.
    pub fn with_admin_token(mut self, token: Option<&str>) -> Self {
        self.admin = AdminGuard::new(token);
        self
    }

    /// Build the route table.
    pub fn router(&self) -> Router {
        let gate = &self.gatekeeper;

        Router::new()
            .route("/health", get(health))
            .route(
                "/api/example",
                limited(get(example_read), gate, "api_general")
                    .merge(limited(post(example_write), gate, "api_write")),
            )
            .route("/api/export", limited(post(export), gate, "api_export"))
            .route(
                "/admin/rate-limits/{policy}/{identifier}",
                limited(get(rate_limit_status).delete(rate_limit_reset), gate, "api_admin")
                    .route_layer(middleware::from_fn_with_state(self.admin.clone(), require_admin)),
            )
            .with_state(self.gatekeeper.clone())
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %self.addr,
            policies = ?self.gatekeeper.policies().names(),
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TollgateError::Io(e)
        })
    }
}

fn limited(
    route: MethodRouter<Gatekeeper>,
    gate: &Gatekeeper,
    policy: &str,
) -> MethodRouter<Gatekeeper> {
    route.route_layer(middleware::from_fn_with_state(
        PolicyGuard::new(gate.clone(), policy),
        enforce,
    ))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn example_read() -> impl IntoResponse {
    Json(json!({
        "message": "Success!",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn example_write(Json(body): Json<Value>) -> impl IntoResponse {
    (
        StatusCode::CREATED,
        Json(json!({
            "message": "Data created successfully",
            "data": body,
        })),
    )
}

async fn export() -> impl IntoResponse {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Export queued" })),
    )
}

/// Admin view of one identifier under one policy.
#[derive(Debug, Serialize)]
struct StatusBody {
    policy: String,
    identifier: String,
    limit: u64,
    window_ms: u64,
    /// `null` when the identifier has a full quota
    status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_at: Option<String>,
}

async fn rate_limit_status(
    State(gate): State<Gatekeeper>,
    Path((policy, identifier)): Path<(String, String)>,
) -> Result<Json<StatusBody>> {
    let limiter = gate.limiter(&policy)?;
    let status = limiter.status(&identifier).await?;

    Ok(Json(StatusBody {
        limit: limiter.policy().max_requests(),
        window_ms: u64::try_from(limiter.policy().window().as_millis()).unwrap_or(u64::MAX),
        reset_at: status.map(|s| epoch_ms_to_utc(s.reset_time).to_rfc3339()),
        status,
        policy,
        identifier,
    }))
}

async fn rate_limit_reset(
    State(gate): State<Gatekeeper>,
    Path((policy, identifier)): Path<(String, String)>,
) -> Result<StatusCode> {
    gate.limiter(&policy)?.reset(&identifier).await?;
    info!(policy = %policy, identifier = %identifier, "Rate limit reset by administrator");
    Ok(StatusCode::NO_CONTENT)
}
