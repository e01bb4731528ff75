//! Command domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Command execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Created, waiting for the target node's next heartbeat
    Pending,
    /// Handed to the node in a heartbeat response
    Sent,
    /// Node confirmed receipt
    Acknowledged,
    /// Node reported success
    Completed,
    /// Node reported failure
    Failed,
    /// No terminal result arrived within the configured horizon
    Timeout,
}

impl CommandStatus {
    /// Whether this status is terminal (no further transitions)
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    /// Stable string form used in the database and on the wire
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Acknowledged => "acknowledged",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    /// Parse from the stable string form
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "acknowledged" => Some(Self::Acknowledged),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in command types
///
/// The wire form is an open string; unknown values deserialize as `Custom`
/// variants are not rejected here — the node's action registry decides
/// whether a type is executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Ping,
    ReloadConfig,
    UpdateConfig,
    ChangeRole,
    Custom,
    /// Extension type not in the built-in set
    #[serde(untagged)]
    Other(String),
}

impl CommandType {
    /// Registry key for dispatch (lower-case)
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Ping => "ping".to_string(),
            Self::ReloadConfig => "reload_config".to_string(),
            Self::UpdateConfig => "update_config".to_string(),
            Self::ChangeRole => "change_role".to_string(),
            Self::Custom => "custom".to_string(),
            Self::Other(s) => s.to_lowercase(),
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// A unit of work dispatched to exactly one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Opaque unique id
    pub id: String,
    pub command_type: CommandType,
    pub status: CommandStatus,
    /// Stable identifier of the target node (immutable for the command's lifetime)
    pub node_id: String,
    pub payload: Option<serde_json::Value>,
    /// Set once the command reaches a terminal state successfully
    pub result: Option<serde_json::Value>,
    /// Set only on failure
    pub error: Option<String>,
    /// Operator who created the command; absent for system-issued commands
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Command {
    /// Create a new pending command for a node
    #[must_use]
    pub fn new(
        node_id: &str,
        command_type: CommandType,
        payload: Option<serde_json::Value>,
        created_by: Option<&str>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            command_type,
            status: CommandStatus::Pending,
            node_id: node_id.to_string(),
            payload,
            result: None,
            error: None,
            created_by: created_by.map(ToString::to_string),
            created_at: Utc::now(),
            sent_at: None,
            acknowledged_at: None,
            completed_at: None,
        }
    }
}

/// Summary of a command handed to a node in a heartbeat response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandBrief {
    pub id: String,
    pub command_type: CommandType,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<&Command> for CommandBrief {
    fn from(cmd: &Command) -> Self {
        Self {
            id: cmd.id.clone(),
            command_type: cmd.command_type.clone(),
            payload: cmd.payload.clone(),
            created_at: cmd.created_at,
        }
    }
}

/// Status a node may report for a command it received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Acknowledged,
    Completed,
    Failed,
}

impl ReportedStatus {
    /// The stored status this report drives the command toward
    #[must_use]
    pub const fn target(self) -> CommandStatus {
        match self {
            Self::Acknowledged => CommandStatus::Acknowledged,
            Self::Completed => CommandStatus::Completed,
            Self::Failed => CommandStatus::Failed,
        }
    }
}

/// A node's report about one command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: ReportedStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            CommandStatus::Pending,
            CommandStatus::Sent,
            CommandStatus::Acknowledged,
            CommandStatus::Completed,
            CommandStatus::Failed,
            CommandStatus::Timeout,
        ] {
            assert_eq!(CommandStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CommandStatus::parse("executing"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(CommandStatus::Completed.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
        assert!(CommandStatus::Timeout.is_terminal());
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(!CommandStatus::Sent.is_terminal());
        assert!(!CommandStatus::Acknowledged.is_terminal());
    }

    #[test]
    fn command_type_wire_form() {
        let json = serde_json::to_string(&CommandType::ReloadConfig).unwrap();
        assert_eq!(json, "\"reload_config\"");

        let parsed: CommandType = serde_json::from_str("\"rotate_keys\"").unwrap();
        assert_eq!(parsed, CommandType::Other("rotate_keys".to_string()));
        assert_eq!(parsed.key(), "rotate_keys");
    }
}
