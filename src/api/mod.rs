//! HTTP API for the controller

pub mod audit;
pub mod auth;
pub mod commands;
pub mod config;
pub mod health;
pub mod nodes;
pub mod rate_limit;

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;
use tower::Layer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::trace::TraceLayer;

use crate::db::{
    AuditRepo, CommandRepo, ConfigRepo, DbPool, NodeRepo, TelemetryRepo, UserRepo,
};
use crate::security::{LockoutGuard, PasswordHasher, RevocationGuard, TokenIssuer};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub db: DbPool,
    pub node_repo: NodeRepo,
    pub command_repo: CommandRepo,
    pub telemetry_repo: TelemetryRepo,
    pub user_repo: UserRepo,
    pub audit_repo: AuditRepo,
    pub config_repo: ConfigRepo,
    /// Failed-login tracking; process lifetime, shared by reference
    pub lockout: Arc<LockoutGuard>,
    /// Revoked session tokens; process lifetime, shared by reference
    pub revocation: Arc<RevocationGuard>,
    pub tokens: TokenIssuer,
    pub password_hasher: Arc<dyn PasswordHasher>,
    /// Seconds before a silent ONLINE node is swept OFFLINE
    pub heartbeat_timeout_seconds: i64,
    /// Login rate limiter (cloud deployments)
    pub rate_limiter: Option<rate_limit::SharedLimiter>,
}

impl ApiState {
    /// Build state over a database pool with the given guards and settings
    #[must_use]
    pub fn new(
        db: DbPool,
        tokens: TokenIssuer,
        password_hasher: Arc<dyn PasswordHasher>,
        heartbeat_timeout_seconds: i64,
        rate_limiter: Option<rate_limit::SharedLimiter>,
    ) -> Self {
        Self {
            node_repo: NodeRepo::new(db.clone()),
            command_repo: CommandRepo::new(db.clone()),
            telemetry_repo: TelemetryRepo::new(db.clone()),
            user_repo: UserRepo::new(db.clone()),
            audit_repo: AuditRepo::new(db.clone()),
            config_repo: ConfigRepo::new(db.clone()),
            lockout: Arc::new(LockoutGuard::new()),
            revocation: Arc::new(RevocationGuard::new()),
            tokens,
            password_hasher,
            heartbeat_timeout_seconds,
            rate_limiter,
            db,
        }
    }
}

/// JSON error payload
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_attempts: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lockout_remaining_seconds: Option<i64>,
}

/// Typed rejection used by every handler
pub type ApiError = (StatusCode, Json<ErrorBody>);

/// Build an error response
#[must_use]
pub fn api_error(code: StatusCode, message: impl Into<String>) -> ApiError {
    (
        code,
        Json(ErrorBody {
            error: message.into(),
            remaining_attempts: None,
            lockout_remaining_seconds: None,
        }),
    )
}

/// Map a domain error onto an HTTP rejection
#[must_use]
pub fn from_domain(err: &crate::Error) -> ApiError {
    match err {
        crate::Error::NotFound(msg) => api_error(StatusCode::NOT_FOUND, msg.clone()),
        crate::Error::Conflict(msg) => api_error(StatusCode::CONFLICT, msg.clone()),
        crate::Error::Validation(msg) => api_error(StatusCode::BAD_REQUEST, msg.clone()),
        crate::Error::Auth(msg) => api_error(StatusCode::UNAUTHORIZED, msg.clone()),
        crate::Error::LockedOut { remaining_seconds } => (
            StatusCode::LOCKED,
            Json(ErrorBody {
                error: "account locked".to_string(),
                remaining_attempts: None,
                lockout_remaining_seconds: Some(*remaining_seconds),
            }),
        ),
        other => {
            tracing::error!(error = %other, "internal error");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// Extract a bearer token from request headers
#[must_use]
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Assemble the full API router
#[must_use]
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api/v1/auth", auth::router(state.clone()))
        .nest("/api/v1/nodes", nodes::router(state.clone()))
        .nest("/api/v1/commands", commands::router(state.clone()))
        .nest("/api/v1/config", config::router(state.clone()))
        .nest("/api/v1/audit", audit::router(state.clone()))
        .merge(health::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // axum 0.8 nesting matches a nested `/` route at `/prefix` (no trailing
    // slash); trim trailing slashes before routing so collection endpoints
    // resolve at both `/prefix` and `/prefix/`.
    let normalized = NormalizePathLayer::trim_trailing_slash().layer(app);
    Router::new().fallback_service(normalized)
}
