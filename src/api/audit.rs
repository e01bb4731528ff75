//! Audit log read endpoint (admin only)

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState, auth::AuthUser, from_domain};
use crate::db::{AuditRecord, Role};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

const fn default_page() -> usize {
    1
}

const fn default_page_size() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct AuditListResponse {
    pub records: Vec<AuditRecord>,
    pub total: i64,
    pub page: usize,
    pub page_size: usize,
}

/// Build audit routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/", get(list_audit)).with_state(state)
}

/// List audit records, newest first
async fn list_audit(
    State(state): State<Arc<ApiState>>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<AuditListResponse>, ApiError> {
    auth.require(Role::Admin)?;

    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);
    let (records, total) = state
        .audit_repo
        .list(page, page_size)
        .map_err(|e| from_domain(&e))?;

    Ok(Json(AuditListResponse {
        records,
        total,
        page,
        page_size,
    }))
}
