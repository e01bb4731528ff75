//! Command creation, query, result, and cancellation endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde::Deserialize;

use super::{ApiError, ApiState, api_error, auth::AuthUser, from_domain};
use crate::commands::{Command, CommandStatus, CommandType, StatusReport};
use crate::db::{AuditEntry, Role, command::CommandFilter};

#[derive(Debug, Deserialize)]
pub struct CommandCreate {
    /// Stable identifier of the target node
    pub node_id: String,
    pub command_type: CommandType,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub status: Option<String>,
    pub command_type: Option<String>,
    pub node_id: Option<String>,
}

const fn default_page() -> usize {
    1
}

const fn default_page_size() -> usize {
    50
}

#[derive(Debug, serde::Serialize)]
pub struct CommandListResponse {
    pub commands: Vec<Command>,
    pub total: i64,
    pub page: usize,
    pub page_size: usize,
}

/// Build command routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", post(create_command).get(list_commands))
        .route("/{command_id}", get(get_command).delete(cancel_command))
        .route("/{command_id}/result", post(report_result))
        .with_state(state)
}

/// Create a command for a node (operator or admin)
///
/// The command is delivered on the target node's next heartbeat.
async fn create_command(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
    Json(body): Json<CommandCreate>,
) -> Result<(StatusCode, Json<Command>), ApiError> {
    auth.require(Role::Operator)?;

    if state
        .node_repo
        .find(&body.node_id)
        .map_err(|e| from_domain(&e))?
        .is_none()
    {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("target node not found: {}", body.node_id),
        ));
    }

    let command = Command::new(
        &body.node_id,
        body.command_type,
        body.payload,
        Some(&auth.user.id),
    );
    state.command_repo.create(&command).map_err(|e| from_domain(&e))?;

    state.audit_repo.record(&AuditEntry {
        user_id: Some(&auth.user.id),
        username: Some(&auth.user.username),
        resource_type: Some("command"),
        resource_id: Some(&command.id),
        details: Some(serde_json::json!({
            "command_type": command.command_type,
            "target_node": command.node_id,
        })),
        ..AuditEntry::success("command_created")
    });

    tracing::info!(
        command_id = %command.id,
        command_type = %command.command_type,
        target = %command.node_id,
        created_by = %auth.user.username,
        "command created"
    );

    Ok((StatusCode::CREATED, Json(command)))
}

/// List commands with filters
async fn list_commands(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<CommandListResponse>, ApiError> {
    auth.require(Role::Observer)?;

    let status = match query.status.as_deref() {
        None => None,
        Some(s) => Some(
            CommandStatus::parse(s)
                .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, format!("unknown status: {s}")))?,
        ),
    };

    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);
    let filter = CommandFilter {
        status,
        command_type: query.command_type.map(CommandType::Other),
        node_id: query.node_id,
    };

    let (commands, total) = state
        .command_repo
        .list(&filter, page, page_size)
        .map_err(|e| from_domain(&e))?;

    Ok(Json(CommandListResponse {
        commands,
        total,
        page,
        page_size,
    }))
}

/// Get one command
async fn get_command(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
    Path(command_id): Path<String>,
) -> Result<Json<Command>, ApiError> {
    auth.require(Role::Observer)?;

    state
        .command_repo
        .find(&command_id)
        .map_err(|e| from_domain(&e))?
        .map(Json)
        .ok_or_else(|| {
            api_error(StatusCode::NOT_FOUND, format!("command not found: {command_id}"))
        })
}

/// Apply a node's status report (called by the node agent)
///
/// Conflicting reports are rejected with 409 and the stored state is left
/// untouched; duplicate reports are accepted idempotently.
async fn report_result(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(command_id): Path<String>,
    Json(report): Json<StatusReport>,
) -> Result<Json<Command>, ApiError> {
    let command = state
        .command_repo
        .find(&command_id)
        .map_err(|e| from_domain(&e))?
        .ok_or_else(|| {
            api_error(StatusCode::NOT_FOUND, format!("command not found: {command_id}"))
        })?;

    // only the command's target node may report on it
    let node = state
        .node_repo
        .find(&command.node_id)
        .map_err(|e| from_domain(&e))?
        .ok_or_else(|| {
            api_error(StatusCode::NOT_FOUND, format!("node not found: {}", command.node_id))
        })?;
    super::nodes::verify_node_token(&headers, &node)?;

    let updated = state
        .command_repo
        .apply_report(&command_id, &report)
        .map_err(|e| from_domain(&e))?;

    tracing::info!(
        command_id = %command_id,
        status = %updated.status,
        "command result updated"
    );

    Ok(Json(updated))
}

/// Cancel a pending command (operator or admin)
async fn cancel_command(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
    Path(command_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    auth.require(Role::Operator)?;

    state.command_repo.cancel(&command_id).map_err(|e| from_domain(&e))?;

    state.audit_repo.record(&AuditEntry {
        user_id: Some(&auth.user.id),
        username: Some(&auth.user.username),
        resource_type: Some("command"),
        resource_id: Some(&command_id),
        ..AuditEntry::success("command_cancelled")
    });

    tracing::info!(command_id, cancelled_by = %auth.user.username, "command cancelled");
    Ok(StatusCode::NO_CONTENT)
}
