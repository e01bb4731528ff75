//! Configuration endpoints: global and per-node settings

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;

use super::{ApiError, ApiState, api_error, auth::AuthUser, from_domain};
use crate::db::{AuditEntry, ConfigItem, Role};

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    pub scope: Option<String>,
    pub node_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigUpsert {
    pub value: serde_json::Value,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Build configuration routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_configs))
        .route(
            "/{key}",
            get(get_config).put(upsert_config).delete(delete_config),
        )
        .with_state(state)
}

/// List configuration items with optional scope/node filters
async fn list_configs(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<Vec<ConfigItem>>, ApiError> {
    auth.require(Role::Observer)?;

    let items = state
        .config_repo
        .list(query.scope.as_deref(), query.node_id.as_deref())
        .map_err(|e| from_domain(&e))?;
    Ok(Json(items))
}

/// Fetch one configuration item
async fn get_config(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
    Path(key): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<ConfigItem>, ApiError> {
    auth.require(Role::Observer)?;

    state
        .config_repo
        .get(&key, query.node_id.as_deref())
        .map_err(|e| from_domain(&e))?
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("config not found: {key}")))
}

/// Create or update a configuration item (operator or admin)
async fn upsert_config(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
    Path(key): Path<String>,
    Json(body): Json<ConfigUpsert>,
) -> Result<Json<ConfigItem>, ApiError> {
    auth.require(Role::Operator)?;

    if let Some(node_id) = &body.node_id {
        if state.node_repo.find(node_id).map_err(|e| from_domain(&e))?.is_none() {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("node not found: {node_id}"),
            ));
        }
    }

    let item = state
        .config_repo
        .upsert(
            &key,
            &body.value,
            body.node_id.as_deref(),
            body.description.as_deref(),
        )
        .map_err(|e| from_domain(&e))?;

    state.audit_repo.record(&AuditEntry {
        user_id: Some(&auth.user.id),
        username: Some(&auth.user.username),
        resource_type: Some("config"),
        resource_id: Some(&key),
        details: Some(serde_json::json!({"scope": item.scope, "node_id": item.node_id})),
        ..AuditEntry::success("config_updated")
    });

    Ok(Json(item))
}

/// Delete a configuration item (operator or admin)
async fn delete_config(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
    Path(key): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<StatusCode, ApiError> {
    auth.require(Role::Operator)?;

    let deleted = state
        .config_repo
        .delete(&key, query.node_id.as_deref())
        .map_err(|e| from_domain(&e))?;
    if !deleted {
        return Err(api_error(StatusCode::NOT_FOUND, format!("config not found: {key}")));
    }

    state.audit_repo.record(&AuditEntry {
        user_id: Some(&auth.user.id),
        username: Some(&auth.user.username),
        resource_type: Some("config"),
        resource_id: Some(&key),
        ..AuditEntry::success("config_deleted")
    });

    Ok(StatusCode::NO_CONTENT)
}
