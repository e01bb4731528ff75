//! Command handlers for the node agent
//!
//! Each handler implements [`ActionHandler`]; the registry maps a command
//! type to its handler. Unknown types and handler failures become FAILED
//! command results at the dispatch boundary - a bad command never takes
//! down the heartbeat loop.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::commands::{ReportedStatus, StatusReport};
use crate::config::AgentConfig;

/// Wall-clock budget for custom scripts
const SCRIPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of executing one action
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ActionOutcome {
    /// A successful outcome with structured output
    #[must_use]
    pub const fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// A failed outcome with an error message
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// The terminal status this outcome reports
    #[must_use]
    pub const fn status(&self) -> ReportedStatus {
        if self.success {
            ReportedStatus::Completed
        } else {
            ReportedStatus::Failed
        }
    }

    /// Convert into the wire report for the controller
    #[must_use]
    pub fn into_report(self) -> StatusReport {
        StatusReport {
            status: self.status(),
            result: self.result,
            error: self.error,
        }
    }
}

/// One executable capability of the node
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Execute the action with the command's payload
    async fn execute(&self, payload: Option<&serde_json::Value>) -> ActionOutcome;
}

/// Connectivity probe
pub struct PingHandler;

#[async_trait]
impl ActionHandler for PingHandler {
    async fn execute(&self, _payload: Option<&serde_json::Value>) -> ActionOutcome {
        ActionOutcome::ok(serde_json::json!({
            "message": "pong",
            "timestamp": Utc::now().to_rfc3339(),
        }))
    }
}

/// Re-reads and validates the agent configuration file
pub struct ReloadConfigHandler {
    config_path: PathBuf,
}

impl ReloadConfigHandler {
    #[must_use]
    pub const fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }
}

#[async_trait]
impl ActionHandler for ReloadConfigHandler {
    async fn execute(&self, _payload: Option<&serde_json::Value>) -> ActionOutcome {
        match AgentConfig::load(&self.config_path) {
            Ok(_) => ActionOutcome::ok(serde_json::json!({
                "message": "configuration reloaded",
                "config_path": self.config_path.display().to_string(),
            })),
            Err(e) => ActionOutcome::fail(format!("reload failed: {e}")),
        }
    }
}

/// Deep-merges a payload document into the agent configuration file
pub struct UpdateConfigHandler {
    config_path: PathBuf,
}

impl UpdateConfigHandler {
    #[must_use]
    pub const fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }
}

#[async_trait]
impl ActionHandler for UpdateConfigHandler {
    async fn execute(&self, payload: Option<&serde_json::Value>) -> ActionOutcome {
        let Some(updates) = payload.and_then(|p| p.get("config")) else {
            return ActionOutcome::fail("no configuration payload provided");
        };

        let updates: toml::Value = match serde_json::from_value(updates.clone()) {
            Ok(v) => v,
            Err(e) => return ActionOutcome::fail(format!("invalid config payload: {e}")),
        };

        match merge_into_file(&self.config_path, &updates) {
            Ok(keys) => ActionOutcome::ok(serde_json::json!({
                "message": "configuration updated",
                "updated_keys": keys,
            })),
            Err(e) => ActionOutcome::fail(format!("failed to update config: {e}")),
        }
    }
}

/// Rewrites the node's operational role in the configuration file
pub struct ChangeRoleHandler {
    config_path: PathBuf,
}

impl ChangeRoleHandler {
    #[must_use]
    pub const fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }
}

#[async_trait]
impl ActionHandler for ChangeRoleHandler {
    async fn execute(&self, payload: Option<&serde_json::Value>) -> ActionOutcome {
        let Some(role) = payload.and_then(|p| p.get("role")).and_then(|r| r.as_str()) else {
            return ActionOutcome::fail("no role specified in payload");
        };

        let updates = toml::Value::Table(
            [("role".to_string(), toml::Value::String(role.to_string()))]
                .into_iter()
                .collect(),
        );
        match merge_into_file(&self.config_path, &updates) {
            Ok(_) => {
                tracing::info!(role, "node role changed");
                ActionOutcome::ok(serde_json::json!({
                    "message": format!("role changed to {role}"),
                    "new_role": role,
                }))
            }
            Err(e) => ActionOutcome::fail(format!("failed to change role: {e}")),
        }
    }
}

/// Runs an allowlisted script with the payload's params as JSON argv
pub struct ScriptHandler {
    allowed_actions: BTreeMap<String, PathBuf>,
}

impl ScriptHandler {
    #[must_use]
    pub const fn new(allowed_actions: BTreeMap<String, PathBuf>) -> Self {
        Self { allowed_actions }
    }
}

#[async_trait]
impl ActionHandler for ScriptHandler {
    async fn execute(&self, payload: Option<&serde_json::Value>) -> ActionOutcome {
        let Some(payload) = payload else {
            return ActionOutcome::fail("no payload provided for custom command");
        };
        let Some(action) = payload.get("action").and_then(|a| a.as_str()) else {
            return ActionOutcome::fail("no action specified");
        };
        let Some(script) = self.allowed_actions.get(action) else {
            tracing::warn!(action, "unknown or disallowed custom action");
            return ActionOutcome::fail(format!("action '{action}' is not allowed"));
        };

        let params = payload.get("params").cloned().unwrap_or(serde_json::json!({}));
        let params_json = params.to_string();

        let child = tokio::process::Command::new(script)
            .arg(&params_json)
            .output();

        match tokio::time::timeout(SCRIPT_TIMEOUT, child).await {
            Err(_) => ActionOutcome::fail("script execution timed out"),
            Ok(Err(e)) => ActionOutcome::fail(format!("script failed to start: {e}")),
            Ok(Ok(output)) => {
                if output.status.success() {
                    ActionOutcome::ok(serde_json::json!({
                        "action": action,
                        "stdout": String::from_utf8_lossy(&output.stdout),
                        "returncode": output.status.code(),
                    }))
                } else {
                    ActionOutcome::fail(format!(
                        "script failed with code {:?}: {}",
                        output.status.code(),
                        String::from_utf8_lossy(&output.stderr),
                    ))
                }
            }
        }
    }
}

/// Registry of action handlers keyed by lower-cased command type
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Box<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a command type
    pub fn register(&mut self, command_type: &str, handler: Box<dyn ActionHandler>) {
        tracing::debug!(command_type, "registered action handler");
        self.handlers.insert(command_type.to_lowercase(), handler);
    }

    /// Execute the handler for a command type
    ///
    /// Unknown types produce a typed failure, never a panic.
    pub async fn execute(
        &self,
        command_type: &str,
        payload: Option<&serde_json::Value>,
    ) -> ActionOutcome {
        let Some(handler) = self.handlers.get(&command_type.to_lowercase()) else {
            tracing::warn!(command_type, "no handler registered for command type");
            return ActionOutcome::fail(format!("unsupported command type: {command_type}"));
        };
        handler.execute(payload).await
    }
}

/// Registry with the built-in handlers wired to the agent config file
#[must_use]
pub fn default_registry(config_path: &Path, config: &AgentConfig) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry.register("ping", Box::new(PingHandler));
    registry.register(
        "reload_config",
        Box::new(ReloadConfigHandler::new(config_path.to_path_buf())),
    );
    registry.register(
        "update_config",
        Box::new(UpdateConfigHandler::new(config_path.to_path_buf())),
    );
    registry.register(
        "change_role",
        Box::new(ChangeRoleHandler::new(config_path.to_path_buf())),
    );
    registry.register(
        "custom",
        Box::new(ScriptHandler::new(config.allowed_actions.clone())),
    );
    registry
}

fn merge_into_file(path: &Path, updates: &toml::Value) -> crate::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let mut document: toml::Value = toml::from_str(&content)?;

    deep_merge(&mut document, updates);

    let keys = updates
        .as_table()
        .map_or_else(Vec::new, |t| t.keys().cloned().collect());

    let rendered = toml::to_string_pretty(&document)
        .map_err(|e| crate::Error::Config(format!("cannot serialize config: {e}")))?;
    std::fs::write(path, rendered)?;
    Ok(keys)
}

fn deep_merge(base: &mut toml::Value, updates: &toml::Value) {
    match (base, updates) {
        (toml::Value::Table(base_table), toml::Value::Table(update_table)) => {
            for (key, value) in update_table {
                match base_table.get_mut(key) {
                    Some(existing) if existing.is_table() && value.is_table() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        base_table.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, updates) => *base = updates.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("agent.toml");
        AgentConfig::write_template(&path, "edge-1", "http://controller:8000").unwrap();
        path
    }

    #[tokio::test]
    async fn ping_returns_pong() {
        let outcome = PingHandler.execute(None).await;
        assert!(outcome.success);
        assert_eq!(outcome.result.unwrap()["message"], "pong");
    }

    #[tokio::test]
    async fn unknown_type_is_typed_failure() {
        let registry = ActionRegistry::new();
        let outcome = registry.execute("reboot", None).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status(), ReportedStatus::Failed);
        assert!(outcome.error.unwrap().contains("unsupported command type"));
    }

    #[tokio::test]
    async fn registry_keys_are_case_insensitive() {
        let mut registry = ActionRegistry::new();
        registry.register("PING", Box::new(PingHandler));
        assert!(registry.execute("ping", None).await.success);
        assert!(registry.execute("Ping", None).await.success);
    }

    #[tokio::test]
    async fn update_config_merges_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir);

        let handler = UpdateConfigHandler::new(path.clone());
        let payload = serde_json::json!({
            "config": {
                "heartbeat_interval_seconds": 5,
                "controller": { "timeout_seconds": 3 }
            }
        });
        let outcome = handler.execute(Some(&payload)).await;
        assert!(outcome.success, "{:?}", outcome.error);

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.heartbeat_interval_seconds, 5);
        assert_eq!(config.controller.timeout_seconds, 3);
        // untouched keys survive the merge
        assert_eq!(config.controller.primary_url, "http://controller:8000");
    }

    #[tokio::test]
    async fn update_config_without_payload_fails() {
        let dir = tempfile::tempdir().unwrap();
        let handler = UpdateConfigHandler::new(write_config(&dir));
        let outcome = handler.execute(None).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn change_role_rewrites_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir);

        let handler = ChangeRoleHandler::new(path.clone());
        let outcome = handler
            .execute(Some(&serde_json::json!({"role": "relay"})))
            .await;
        assert!(outcome.success);

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.role.as_deref(), Some("relay"));
    }

    #[tokio::test]
    async fn disallowed_script_rejected() {
        let handler = ScriptHandler::new(BTreeMap::new());
        let outcome = handler
            .execute(Some(&serde_json::json!({"action": "wipe"})))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("not allowed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn allowed_script_runs_with_params() {
        let mut allowed = BTreeMap::new();
        allowed.insert("echo".to_string(), PathBuf::from("/bin/echo"));

        let handler = ScriptHandler::new(allowed);
        let outcome = handler
            .execute(Some(&serde_json::json!({
                "action": "echo",
                "params": {"level": 3}
            })))
            .await;
        assert!(outcome.success, "{:?}", outcome.error);
        let stdout = outcome.result.unwrap()["stdout"].as_str().unwrap().to_string();
        assert!(stdout.contains("\"level\":3"));
    }
}
