//! Configuration for the controller and the node agent
//!
//! The controller is configured from `TETHER_*` environment variables; the
//! agent from a TOML file so a fleet image can ship one alongside the
//! binary (`tether init-config` writes a starter).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Path to the SQLite database
    pub database_path: PathBuf,

    /// Secret for signing operator session tokens
    pub jwt_secret: String,

    /// Operator session lifetime in minutes
    pub jwt_expiry_minutes: i64,

    /// Seconds after which a silent ONLINE node is swept to OFFLINE
    pub heartbeat_timeout_seconds: i64,

    /// Age at which non-terminal commands are timed out by the sweeper
    pub command_timeout_seconds: i64,

    /// Login requests per minute across the deployment; `None` disables
    pub login_rate_limit_per_minute: Option<u32>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            jwt_secret: "change-me-in-production".to_string(),
            jwt_expiry_minutes: 60,
            heartbeat_timeout_seconds: 60,
            command_timeout_seconds: 15 * 60,
            login_rate_limit_per_minute: Some(30),
        }
    }
}

impl ControllerConfig {
    /// Load from environment variables, falling back to defaults
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let jwt_secret = std::env::var("TETHER_JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("TETHER_JWT_SECRET not set - using a development secret");
            defaults.jwt_secret.clone()
        });

        Self {
            database_path: std::env::var("TETHER_DB")
                .map_or(defaults.database_path, PathBuf::from),
            jwt_secret,
            jwt_expiry_minutes: env_i64("TETHER_TOKEN_EXPIRY_MINUTES", defaults.jwt_expiry_minutes),
            heartbeat_timeout_seconds: env_i64(
                "TETHER_HEARTBEAT_TIMEOUT_SECONDS",
                defaults.heartbeat_timeout_seconds,
            ),
            command_timeout_seconds: env_i64(
                "TETHER_COMMAND_TIMEOUT_SECONDS",
                defaults.command_timeout_seconds,
            ),
            login_rate_limit_per_minute: match env_i64("TETHER_LOGIN_RATE_LIMIT", 30) {
                n if n <= 0 => None,
                n => u32::try_from(n).ok(),
            },
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Default controller database location
///
/// Uses `~/.local/share/tether/controller.db` on Linux
fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "tether", "tether").map_or_else(
        || PathBuf::from("tether-controller.db"),
        |d| d.data_dir().join("controller.db"),
    )
}

/// Node agent configuration, loaded from a TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Stable node identifier, unique across the fleet
    pub node_id: String,

    /// Human-readable name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Node type (sensor, relay, vehicle, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,

    /// Operational role, adjustable at runtime via a change-role command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Directory for the persisted auth token and other agent state
    pub data_dir: PathBuf,

    /// Seconds between heartbeats
    pub heartbeat_interval_seconds: u64,

    /// In-request retry budget for retryable HTTP statuses
    pub max_retries: u32,

    /// Base of the in-request exponential backoff, in milliseconds
    pub retry_backoff_base_ms: u64,

    /// Cap on the registration retry delay, in seconds
    pub registration_backoff_max_seconds: u64,

    /// Controller endpoints
    pub controller: ControllerEndpoints,

    /// Allowed custom actions: action name -> script path
    pub allowed_actions: BTreeMap<String, PathBuf>,
}

/// Controller endpoint list and per-request settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerEndpoints {
    /// Primary controller URL
    pub primary_url: String,

    /// Backups tried after connection-level failures, in order
    pub backup_urls: Vec<String>,

    /// Per-request timeout in seconds
    pub timeout_seconds: u64,

    /// Verify TLS certificates (disable only on closed test networks)
    pub verify_tls: bool,
}

impl Default for ControllerEndpoints {
    fn default() -> Self {
        Self {
            primary_url: "http://localhost:8000".to_string(),
            backup_urls: Vec::new(),
            timeout_seconds: 10,
            verify_tls: true,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            name: None,
            node_type: None,
            role: None,
            data_dir: PathBuf::from("./tether-agent"),
            heartbeat_interval_seconds: 30,
            max_retries: 3,
            retry_backoff_base_ms: 500,
            registration_backoff_max_seconds: 300,
            controller: ControllerEndpoints::default(),
            allowed_actions: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    /// Load agent configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing, unreadable, or invalid, or if
    /// `node_id` is empty
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read agent config {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content)?;

        if config.node_id.is_empty() {
            return Err(Error::Config("agent config is missing node_id".to_string()));
        }
        Ok(config)
    }

    /// Write a starter configuration file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn write_template(path: &Path, node_id: &str, controller_url: &str) -> Result<()> {
        let config = Self {
            node_id: node_id.to_string(),
            controller: ControllerEndpoints {
                primary_url: controller_url.to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let content = toml::to_string_pretty(&config)
            .map_err(|e| Error::Config(format!("cannot serialize agent config: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// All controller endpoints, primary first
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        let mut urls = vec![self.controller.primary_url.clone()];
        urls.extend(self.controller.backup_urls.iter().cloned());
        urls
    }

    /// Path of the persisted auth token
    #[must_use]
    pub fn token_path(&self) -> PathBuf {
        self.data_dir.join(".auth_token")
    }
}
