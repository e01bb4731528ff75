//! Node registration, heartbeat, and query endpoints
//!
//! The heartbeat handler is the controller half of the command delivery
//! cycle: it refreshes the node's status and telemetry snapshot, persists
//! a sample, then claims up to a bounded batch of pending commands FIFO
//! (each via a per-command compare-and-swap) and returns them.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState, api_error, auth::AuthUser, bearer_token, from_domain};
use crate::commands::CommandBrief;
use crate::db::{
    AuditEntry, HEARTBEAT_BATCH_SIZE, Node, NodeRegistration, NodeStatus, Role, TelemetrySample,
    node::NodeFilter,
};
use crate::security::{generate_node_token, password::constant_time_eq};

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: String,
    pub node_id: String,
    pub auth_token: String,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: String,
    #[serde(flatten)]
    pub sample: TelemetrySample,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
    pub server_time: DateTime<Utc>,
    pub pending_commands: Vec<CommandBrief>,
}

/// Node details; the bearer token never leaves the register response
#[derive(Debug, Serialize)]
pub struct NodeResponse {
    pub node_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub node_type: Option<String>,
    pub status: NodeStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub disk_usage: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub registered_at: DateTime<Utc>,
}

impl From<&Node> for NodeResponse {
    fn from(node: &Node) -> Self {
        Self {
            node_id: node.node_id.clone(),
            name: node.name.clone(),
            description: node.description.clone(),
            node_type: node.node_type.clone(),
            status: node.status,
            last_heartbeat: node.last_heartbeat,
            cpu_usage: node.cpu_usage,
            memory_usage: node.memory_usage,
            disk_usage: node.disk_usage,
            latitude: node.latitude,
            longitude: node.longitude,
            altitude: node.altitude,
            ip_address: node.ip_address.clone(),
            mac_address: node.mac_address.clone(),
            metadata: node.metadata.clone(),
            registered_at: node.registered_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NodeListResponse {
    pub nodes: Vec<NodeResponse>,
    pub total: i64,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub status: Option<String>,
    pub node_type: Option<String>,
}

const fn default_page() -> usize {
    1
}

const fn default_page_size() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct TelemetryQuery {
    #[serde(default = "default_telemetry_limit")]
    pub limit: usize,
}

const fn default_telemetry_limit() -> usize {
    100
}

/// Build node routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
        .route("/", get(list_nodes))
        .route("/{node_id}", get(get_node).delete(delete_node))
        .route("/{node_id}/telemetry", get(node_telemetry))
        .with_state(state)
}

/// Authenticate a node request against the node's current bearer token
pub(super) fn verify_node_token(headers: &HeaderMap, node: &Node) -> Result<(), ApiError> {
    let provided = bearer_token(headers)
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "missing node token"))?;
    let expected = node
        .auth_token
        .as_deref()
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "node has no token; re-register"))?;

    if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(api_error(StatusCode::UNAUTHORIZED, "invalid node token"))
    }
}

/// Register or re-register a node; returns a fresh bearer token
async fn register(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<NodeRegistration>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    if body.node_id.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "node_id must not be empty"));
    }

    let token = generate_node_token();
    let (node, created) = state
        .node_repo
        .register(&body, &token)
        .map_err(|e| from_domain(&e))?;

    let action = if created { "node_registered" } else { "node_reregistered" };
    state.audit_repo.record(&AuditEntry {
        resource_type: Some("node"),
        resource_id: Some(&node.node_id),
        details: Some(serde_json::json!({"node_type": node.node_type})),
        ..AuditEntry::success(action)
    });

    tracing::info!(node_id = %node.node_id, created, "node registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: node.id,
            node_id: node.node_id,
            auth_token: token,
            message: if created {
                "node registered successfully"
            } else {
                "node re-registered successfully"
            },
        }),
    ))
}

/// Process a heartbeat: refresh state, store telemetry, hand out commands
async fn heartbeat(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let node = state
        .node_repo
        .find(&body.node_id)
        .map_err(|e| from_domain(&e))?
        .ok_or_else(|| {
            api_error(StatusCode::NOT_FOUND, format!("node not found: {}", body.node_id))
        })?;

    verify_node_token(&headers, &node)?;

    state
        .node_repo
        .record_heartbeat(&body.node_id, &body.sample)
        .map_err(|e| from_domain(&e))?;
    state
        .telemetry_repo
        .insert(&body.node_id, &body.sample)
        .map_err(|e| from_domain(&e))?;

    let claimed = state
        .command_repo
        .claim_pending(&body.node_id, HEARTBEAT_BATCH_SIZE)
        .map_err(|e| from_domain(&e))?;

    if !claimed.is_empty() {
        tracing::info!(node_id = %body.node_id, count = claimed.len(), "commands dispatched");
    }

    Ok(Json(HeartbeatResponse {
        acknowledged: true,
        server_time: Utc::now(),
        pending_commands: claimed.iter().map(CommandBrief::from).collect(),
    }))
}

/// List nodes, sweeping stale ONLINE nodes to OFFLINE first
async fn list_nodes(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<NodeListResponse>, ApiError> {
    auth.require(Role::Observer)?;

    state
        .node_repo
        .mark_stale_offline(state.heartbeat_timeout_seconds)
        .map_err(|e| from_domain(&e))?;

    let status = match query.status.as_deref() {
        None => None,
        Some(s) => Some(
            NodeStatus::parse(s)
                .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, format!("unknown status: {s}")))?,
        ),
    };

    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);
    let filter = NodeFilter {
        status,
        node_type: query.node_type,
    };

    let (nodes, total) = state
        .node_repo
        .list(&filter, page, page_size)
        .map_err(|e| from_domain(&e))?;

    Ok(Json(NodeListResponse {
        nodes: nodes.iter().map(NodeResponse::from).collect(),
        total,
        page,
        page_size,
    }))
}

/// Get one node
async fn get_node(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
    Path(node_id): Path<String>,
) -> Result<Json<NodeResponse>, ApiError> {
    auth.require(Role::Observer)?;

    state
        .node_repo
        .find(&node_id)
        .map_err(|e| from_domain(&e))?
        .map(|n| Json(NodeResponse::from(&n)))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("node not found: {node_id}")))
}

/// Recent telemetry samples for a node
async fn node_telemetry(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
    Path(node_id): Path<String>,
    Query(query): Query<TelemetryQuery>,
) -> Result<Json<Vec<crate::db::TelemetryRecord>>, ApiError> {
    auth.require(Role::Observer)?;

    if state.node_repo.find(&node_id).map_err(|e| from_domain(&e))?.is_none() {
        return Err(api_error(StatusCode::NOT_FOUND, format!("node not found: {node_id}")));
    }

    let records = state
        .telemetry_repo
        .recent(&node_id, query.limit.clamp(1, 1000))
        .map_err(|e| from_domain(&e))?;
    Ok(Json(records))
}

/// Delete a node (operator or admin)
async fn delete_node(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
    Path(node_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    auth.require(Role::Operator)?;

    let deleted = state.node_repo.delete(&node_id).map_err(|e| from_domain(&e))?;
    if !deleted {
        return Err(api_error(StatusCode::NOT_FOUND, format!("node not found: {node_id}")));
    }

    state.audit_repo.record(&AuditEntry {
        user_id: Some(&auth.user.id),
        username: Some(&auth.user.username),
        resource_type: Some("node"),
        resource_id: Some(&node_id),
        ..AuditEntry::success("node_deleted")
    });

    tracing::info!(node_id, deleted_by = %auth.user.username, "node deleted");
    Ok(StatusCode::NO_CONTENT)
}
