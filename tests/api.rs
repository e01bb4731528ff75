//! API endpoint integration tests

use std::collections::HashSet;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use tower::ServiceExt;

use tether_mesh::api;
use tether_mesh::db::Role;

mod common;
use common::{login_as, test_state};

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }

    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

/// Register a node and return its bearer token
async fn register_node(app: &Router, node_id: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/nodes/register",
        None,
        Some(serde_json::json!({"node_id": node_id, "node_type": "sensor"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["auth_token"].as_str().unwrap().to_string()
}

async fn heartbeat(app: &Router, node_id: &str, token: &str) -> serde_json::Value {
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/nodes/heartbeat",
        Some(token),
        Some(serde_json::json!({"node_id": node_id, "cpu_usage": 12.5})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn health_endpoint() {
    let app = api::router(test_state());
    let (status, body) = send(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn node_registration_issues_token() {
    let app = api::router(test_state());

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/nodes/register",
        None,
        Some(serde_json::json!({"node_id": "edge-1", "name": "Gate unit"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["node_id"], "edge-1");
    assert!(!body["auth_token"].as_str().unwrap().is_empty());

    // re-registration rotates the token
    let (status, body2) = send(
        &app,
        "POST",
        "/api/v1/nodes/register",
        None,
        Some(serde_json::json!({"node_id": "edge-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(body2["auth_token"], body["auth_token"]);
}

#[tokio::test]
async fn heartbeat_requires_current_node_token() {
    let app = api::router(test_state());
    let token = register_node(&app, "edge-1").await;

    let hb = serde_json::json!({"node_id": "edge-1"});

    let (status, _) = send(&app, "POST", "/api/v1/nodes/heartbeat", None, Some(hb.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/nodes/heartbeat",
        Some("wrong-token"),
        Some(hb.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/nodes/heartbeat",
        Some(&token),
        Some(hb),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["acknowledged"], true);
    assert_eq!(body["pending_commands"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn heartbeat_for_unknown_node_is_404() {
    let app = api::router(test_state());
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/nodes/heartbeat",
        Some("any"),
        Some(serde_json::json!({"node_id": "ghost"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn heartbeat_delivers_fifo_batches() {
    let state = test_state();
    let app = api::router(state.clone());
    let node_token = register_node(&app, "edge-1").await;
    let operator = login_as(&state, "op", Role::Operator);

    let mut created: Vec<String> = Vec::new();
    for _ in 0..15 {
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/commands/",
            Some(&operator),
            Some(serde_json::json!({"node_id": "edge-1", "command_type": "ping"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        created.push(body["id"].as_str().unwrap().to_string());
    }

    let first = heartbeat(&app, "edge-1", &node_token).await;
    let first_ids: Vec<String> = first["pending_commands"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(first_ids.len(), 10, "batch is bounded");
    let oldest_ten: HashSet<&String> = created[..10].iter().collect();
    assert_eq!(
        first_ids.iter().collect::<HashSet<_>>(),
        oldest_ten,
        "oldest commands go first"
    );

    let second = heartbeat(&app, "edge-1", &node_token).await;
    let second_ids: Vec<String> = second["pending_commands"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(second_ids.len(), 5, "remainder on the next heartbeat");
    assert!(
        first_ids.iter().all(|id| !second_ids.contains(id)),
        "no command is handed out twice"
    );
}

#[tokio::test]
async fn commands_never_cross_nodes() {
    let state = test_state();
    let app = api::router(state.clone());
    let token_a = register_node(&app, "edge-a").await;
    let token_b = register_node(&app, "edge-b").await;
    let operator = login_as(&state, "op", Role::Operator);

    let (_, cmd) = send(
        &app,
        "POST",
        "/api/v1/commands/",
        Some(&operator),
        Some(serde_json::json!({"node_id": "edge-a", "command_type": "ping"})),
    )
    .await;
    let cmd_id = cmd["id"].as_str().unwrap();

    let b = heartbeat(&app, "edge-b", &token_b).await;
    assert_eq!(b["pending_commands"].as_array().unwrap().len(), 0);

    let a = heartbeat(&app, "edge-a", &token_a).await;
    let ids: Vec<&str> = a["pending_commands"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![cmd_id]);
}

#[tokio::test]
async fn result_reporting_is_idempotent_and_conflict_safe() {
    let state = test_state();
    let app = api::router(state.clone());
    let node_token = register_node(&app, "edge-1").await;
    let operator = login_as(&state, "op", Role::Operator);

    let (_, cmd) = send(
        &app,
        "POST",
        "/api/v1/commands/",
        Some(&operator),
        Some(serde_json::json!({"node_id": "edge-1", "command_type": "ping"})),
    )
    .await;
    let cmd_id = cmd["id"].as_str().unwrap().to_string();
    heartbeat(&app, "edge-1", &node_token).await;

    let result_uri = format!("/api/v1/commands/{cmd_id}/result");

    // ack, then ack again: both accepted
    for _ in 0..2 {
        let (status, _) = send(
            &app,
            "POST",
            &result_uri,
            Some(&node_token),
            Some(serde_json::json!({"status": "acknowledged"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(
        &app,
        "POST",
        &result_uri,
        Some(&node_token),
        Some(serde_json::json!({"status": "completed", "result": {"message": "pong"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    // same terminal status again: no-op
    let (status, _) = send(
        &app,
        "POST",
        &result_uri,
        Some(&node_token),
        Some(serde_json::json!({"status": "completed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // conflicting terminal status: rejected, original retained
    let (status, _) = send(
        &app,
        "POST",
        &result_uri,
        Some(&node_token),
        Some(serde_json::json!({"status": "failed", "error": "late retry"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let observer = login_as(&state, "obs", Role::Observer);
    let (_, stored) = send(
        &app,
        "GET",
        &format!("/api/v1/commands/{cmd_id}"),
        Some(&observer),
        None,
    )
    .await;
    assert_eq!(stored["status"], "completed");
    assert_eq!(stored["result"]["message"], "pong");
}

#[tokio::test]
async fn result_reporting_requires_target_node_token() {
    let state = test_state();
    let app = api::router(state.clone());
    let _token_a = register_node(&app, "edge-a").await;
    let token_b = register_node(&app, "edge-b").await;
    let operator = login_as(&state, "op", Role::Operator);

    let (_, cmd) = send(
        &app,
        "POST",
        "/api/v1/commands/",
        Some(&operator),
        Some(serde_json::json!({"node_id": "edge-a", "command_type": "ping"})),
    )
    .await;
    let cmd_id = cmd["id"].as_str().unwrap();

    // edge-b's token cannot report on edge-a's command
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/v1/commands/{cmd_id}/result"),
        Some(&token_b),
        Some(serde_json::json!({"status": "acknowledged"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cancel_only_while_pending() {
    let state = test_state();
    let app = api::router(state.clone());
    let node_token = register_node(&app, "edge-1").await;
    let operator = login_as(&state, "op", Role::Operator);

    let (_, cmd) = send(
        &app,
        "POST",
        "/api/v1/commands/",
        Some(&operator),
        Some(serde_json::json!({"node_id": "edge-1", "command_type": "ping"})),
    )
    .await;
    let pending_id = cmd["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/api/v1/commands/{pending_id}"),
        Some(&operator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, cmd) = send(
        &app,
        "POST",
        "/api/v1/commands/",
        Some(&operator),
        Some(serde_json::json!({"node_id": "edge-1", "command_type": "ping"})),
    )
    .await;
    let sent_id = cmd["id"].as_str().unwrap().to_string();
    heartbeat(&app, "edge-1", &node_token).await;

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/api/v1/commands/{sent_id}"),
        Some(&operator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn login_lockout_after_repeated_failures() {
    let state = test_state();
    let app = api::router(state.clone());
    // creates the user with the known test password
    let _ = login_as(&state, "alice", Role::Admin);

    // four failures leave one attempt
    for attempt in 0..4 {
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(serde_json::json!({"username": "alice", "password": "wrong"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            body["remaining_attempts"].as_u64().unwrap(),
            4 - attempt,
            "remaining attempts count down"
        );
    }

    // fifth failure fails AND locks
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(serde_json::json!({"username": "alice", "password": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // sixth attempt, even with the correct password, is locked out
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(serde_json::json!({"username": "alice", "password": "Str0ng-pass!"})),
    )
    .await;
    assert_eq!(status, StatusCode::LOCKED);
    assert!(body["lockout_remaining_seconds"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn login_success_clears_failure_history() {
    let state = test_state();
    let app = api::router(state.clone());
    let _ = login_as(&state, "bob", Role::Observer);

    for _ in 0..3 {
        send(
            &app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(serde_json::json!({"username": "bob", "password": "wrong"})),
        )
        .await;
    }

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(serde_json::json!({"username": "bob", "password": "Str0ng-pass!"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["access_token"].as_str().unwrap().is_empty());

    // a fresh failure starts from a clean slate
    let (_, body) = send(
        &app,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(serde_json::json!({"username": "bob", "password": "wrong"})),
    )
    .await;
    assert_eq!(body["remaining_attempts"].as_u64().unwrap(), 4);
}

#[tokio::test]
async fn logout_revokes_the_session_token() {
    let state = test_state();
    let app = api::router(state.clone());
    let token = login_as(&state, "carol", Role::Observer);

    let (status, _) = send(&app, "GET", "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "POST", "/api/v1/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "GET", "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn role_gates_are_enforced() {
    let state = test_state();
    let app = api::router(state.clone());
    register_node(&app, "edge-1").await;

    // listing nodes requires authentication
    let (status, _) = send(&app, "GET", "/api/v1/nodes/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let observer = login_as(&state, "obs", Role::Observer);
    let (status, body) = send(&app, "GET", "/api/v1/nodes/", Some(&observer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert!(
        body["nodes"][0].get("auth_token").is_none(),
        "node tokens never leak from list responses"
    );

    // observers cannot create commands or delete nodes
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/commands/",
        Some(&observer),
        Some(serde_json::json!({"node_id": "edge-1", "command_type": "ping"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "DELETE", "/api/v1/nodes/edge-1", Some(&observer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // operators cannot manage users
    let operator = login_as(&state, "op", Role::Operator);
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/auth/users",
        Some(&operator),
        Some(serde_json::json!({
            "username": "eve", "password": "Str0ng-pass!", "role": "observer"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // admins can
    let admin = login_as(&state, "root", Role::Admin);
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/auth/users",
        Some(&admin),
        Some(serde_json::json!({
            "username": "eve", "password": "Str0ng-pass!", "role": "observer"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // weak passwords are rejected
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/auth/users",
        Some(&admin),
        Some(serde_json::json!({
            "username": "mallory", "password": "weak", "role": "observer"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn telemetry_is_persisted_per_heartbeat() {
    let state = test_state();
    let app = api::router(state.clone());
    let node_token = register_node(&app, "edge-1").await;

    heartbeat(&app, "edge-1", &node_token).await;
    heartbeat(&app, "edge-1", &node_token).await;

    let observer = login_as(&state, "obs", Role::Observer);
    let (status, body) = send(
        &app,
        "GET",
        "/api/v1/nodes/edge-1/telemetry",
        Some(&observer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["cpu_usage"], 12.5);
    // absent fields stay absent, not zeroed
    assert!(records[0].get("memory_usage").is_none() || records[0]["memory_usage"].is_null());
}

#[tokio::test]
async fn config_scopes_and_audit_trail() {
    let state = test_state();
    let app = api::router(state.clone());
    register_node(&app, "edge-1").await;
    let operator = login_as(&state, "op", Role::Operator);
    let admin = login_as(&state, "root", Role::Admin);

    let (status, _) = send(
        &app,
        "PUT",
        "/api/v1/config/mesh_channel",
        Some(&operator),
        Some(serde_json::json!({"value": 11})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "PUT",
        "/api/v1/config/mesh_channel",
        Some(&operator),
        Some(serde_json::json!({"value": 99, "node_id": "edge-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, global) = send(
        &app,
        "GET",
        "/api/v1/config/mesh_channel",
        Some(&operator),
        None,
    )
    .await;
    assert_eq!(global["value"], 11);
    assert_eq!(global["scope"], "global");

    let (_, scoped) = send(
        &app,
        "GET",
        "/api/v1/config/mesh_channel?node_id=edge-1",
        Some(&operator),
        None,
    )
    .await;
    assert_eq!(scoped["value"], 99);

    // config writes show up in the audit log (admin only)
    let (status, audit) = send(&app, "GET", "/api/v1/audit/", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<&str> = audit["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["action"].as_str().unwrap())
        .collect();
    assert!(actions.contains(&"config_updated"));
    assert!(actions.contains(&"node_registered"));

    let (status, _) = send(&app, "GET", "/api/v1/audit/", Some(&operator), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
