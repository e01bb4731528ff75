//! Authentication endpoints and the request authentication extractor
//!
//! Login consults the lockout guard before touching credentials, so a
//! locked identity cannot burn verification work or gather timing signal.
//! Session tokens carry a `jti`; logout revokes it until natural expiry.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, State},
    http::{StatusCode, request::Parts},
    middleware,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState, ErrorBody, api_error, bearer_token, rate_limit};
use crate::db::{AuditEntry, Role, User};
use crate::security::{Claims, validate_complexity};

/// An authenticated operator request
pub struct AuthUser {
    pub user: User,
    pub claims: Claims,
}

impl AuthUser {
    /// Reject unless the user's role satisfies `required`
    ///
    /// # Errors
    ///
    /// Returns 403 when the role is insufficient
    pub fn require(&self, required: Role) -> Result<(), ApiError> {
        if self.user.role.allows(required) {
            Ok(())
        } else {
            Err(api_error(
                StatusCode::FORBIDDEN,
                format!("requires {required} role"),
            ))
        }
    }
}

impl FromRequestParts<Arc<ApiState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> Result<Self, Self::Rejection> {
        let unauthorized = |msg: &str| api_error(StatusCode::UNAUTHORIZED, msg);

        let token = bearer_token(&parts.headers)
            .ok_or_else(|| unauthorized("missing bearer token"))?;

        let claims = state
            .tokens
            .decode(token)
            .map_err(|_| unauthorized("invalid or expired token"))?;

        if state.revocation.is_revoked(&claims.jti) {
            return Err(unauthorized("token has been revoked"));
        }

        let user = state
            .user_repo
            .find(&claims.user_id)
            .map_err(|e| super::from_domain(&e))?
            .ok_or_else(|| unauthorized("user no longer exists"))?;

        if !user.is_active {
            return Err(unauthorized("user is disabled"));
        }

        Ok(Self { user, claims })
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct UserCreate {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
            last_login: user.last_login,
        }
    }
}

/// Build auth routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/users", post(create_user).get(list_users))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_middleware,
        ))
        .with_state(state)
}

/// Authenticate and issue a session token
async fn login(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    // the lockout guard is consulted before any credential work
    if state.lockout.is_locked_out(&body.username) {
        let remaining = state
            .lockout
            .lockout_remaining_seconds(&body.username)
            .unwrap_or(0);
        return Err(super::from_domain(&crate::Error::LockedOut {
            remaining_seconds: remaining,
        }));
    }

    let user = state
        .user_repo
        .find_by_username(&body.username)
        .map_err(|e| super::from_domain(&e))?;

    let user = user.filter(|u| {
        u.is_active && state.password_hasher.verify(&body.password, &u.hashed_password)
    });

    let Some(user) = user else {
        let locked_now = state.lockout.record_failed_attempt(&body.username);
        state.audit_repo.record(&AuditEntry {
            username: Some(&body.username),
            resource_type: Some("user"),
            details: Some(serde_json::json!({"locked": locked_now})),
            ..AuditEntry::failure("login_failed", "invalid credentials")
        });

        let remaining = state.lockout.remaining_attempts(&body.username);
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody {
                error: "incorrect username or password".to_string(),
                remaining_attempts: Some(remaining),
                lockout_remaining_seconds: None,
            }),
        ));
    };

    // success clears the identity's failure history
    state.lockout.clear_attempts(&body.username);
    state
        .user_repo
        .touch_last_login(&user.id)
        .map_err(|e| super::from_domain(&e))?;

    let (access_token, _claims) = state
        .tokens
        .issue(&user.username, &user.id, user.role)
        .map_err(|e| super::from_domain(&e))?;

    state.audit_repo.record(&AuditEntry {
        user_id: Some(&user.id),
        username: Some(&user.username),
        resource_type: Some("user"),
        resource_id: Some(&user.id),
        ..AuditEntry::success("login_success")
    });

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
        expires_in: state.tokens.expiry_seconds(),
        role: user.role,
    }))
}

/// Revoke the presented session token
async fn logout(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
) -> Json<serde_json::Value> {
    state
        .revocation
        .revoke(&auth.claims.jti, auth.claims.expires_at());

    state.audit_repo.record(&AuditEntry {
        user_id: Some(&auth.user.id),
        username: Some(&auth.user.username),
        resource_type: Some("user"),
        resource_id: Some(&auth.user.id),
        ..AuditEntry::success("logout")
    });

    Json(serde_json::json!({"message": "logged out"}))
}

/// Current user details
async fn me(auth: AuthUser) -> Json<UserResponse> {
    Json(UserResponse::from(&auth.user))
}

/// Create a user (admin only)
async fn create_user(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
    Json(body): Json<UserCreate>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    auth.require(Role::Admin)?;

    let problems = validate_complexity(&body.password);
    if !problems.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, problems.join("; ")));
    }

    let digest = state.password_hasher.hash(&body.password);
    let user = state
        .user_repo
        .create(&body.username, body.email.as_deref(), &digest, body.role)
        .map_err(|e| super::from_domain(&e))?;

    state.audit_repo.record(&AuditEntry {
        user_id: Some(&auth.user.id),
        username: Some(&auth.user.username),
        resource_type: Some("user"),
        resource_id: Some(&user.id),
        details: Some(serde_json::json!({
            "username": user.username,
            "role": user.role,
        })),
        ..AuditEntry::success("user_created")
    });

    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

/// List users (admin only)
async fn list_users(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    auth.require(Role::Admin)?;
    let users = state.user_repo.list().map_err(|e| super::from_domain(&e))?;
    Ok(Json(users.iter().map(UserResponse::from).collect()))
}
