//! Node repository: registration, heartbeat state, and the offline sweep

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DbPool;
use super::telemetry::TelemetrySample;
use super::user::parse_datetime;
use crate::{Error, Result};

/// Node operational status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    Degraded,
    Unknown,
}

impl NodeStatus {
    /// Stable string form used in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Degraded => "degraded",
            Self::Unknown => "unknown",
        }
    }

    /// Parse from the stable string form
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            "degraded" => Some(Self::Degraded),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered edge node
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    /// Operator-chosen stable identifier, immutable and unique
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
    /// Current bearer token; replaced wholesale on re-registration
    pub auth_token: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration payload from a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Filters for listing nodes
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub status: Option<NodeStatus>,
    pub node_type: Option<String>,
}

/// Node repository
#[derive(Clone)]
pub struct NodeRepo {
    pool: DbPool,
}

const COLUMNS: &str = "id, node_id, name, description, node_type, status, last_heartbeat, \
                       cpu_usage, memory_usage, disk_usage, latitude, longitude, altitude, \
                       ip_address, mac_address, auth_token, metadata, registered_at, updated_at";

impl NodeRepo {
    /// Create a new node repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<super::DbConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    /// Register or re-register a node, storing the given bearer token
    ///
    /// Re-registration replaces the token, forces the node ONLINE, and
    /// updates descriptive fields only when the registration provides them.
    /// Returns the node and whether it was newly created.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn register(&self, reg: &NodeRegistration, auth_token: &str) -> Result<(Node, bool)> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let metadata = reg.metadata.as_ref().map(serde_json::to_string).transpose()?;

        let updated = conn.execute(
            "UPDATE nodes SET
                name = COALESCE(?2, name),
                description = COALESCE(?3, description),
                node_type = COALESCE(?4, node_type),
                ip_address = COALESCE(?5, ip_address),
                mac_address = COALESCE(?6, mac_address),
                metadata = COALESCE(?7, metadata),
                auth_token = ?8,
                status = 'online',
                last_heartbeat = ?9,
                updated_at = ?9
             WHERE node_id = ?1",
            rusqlite::params![
                reg.node_id,
                reg.name,
                reg.description,
                reg.node_type,
                reg.ip_address,
                reg.mac_address,
                metadata,
                auth_token,
                now,
            ],
        )?;

        if updated == 0 {
            conn.execute(
                "INSERT INTO nodes
                    (id, node_id, name, description, node_type, ip_address, mac_address,
                     metadata, auth_token, status, last_heartbeat, registered_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'online', ?10, ?10, ?10)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    reg.node_id,
                    reg.name,
                    reg.description,
                    reg.node_type,
                    reg.ip_address,
                    reg.mac_address,
                    metadata,
                    auth_token,
                    now,
                ],
            )?;
        }

        let node = conn.query_row(
            &format!("SELECT {COLUMNS} FROM nodes WHERE node_id = ?1"),
            [&reg.node_id],
            node_from_row,
        )?;
        Ok((node, updated == 0))
    }

    /// Find a node by its stable identifier
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, node_id: &str) -> Result<Option<Node>> {
        let conn = self.conn()?;
        let node = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM nodes WHERE node_id = ?1"),
                [node_id],
                node_from_row,
            )
            .ok();
        Ok(node)
    }

    /// Record a heartbeat: force ONLINE and update the telemetry snapshot
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the node is not registered
    pub fn record_heartbeat(&self, node_id: &str, sample: &TelemetrySample) -> Result<()> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let updated = conn.execute(
            "UPDATE nodes SET
                status = 'online',
                last_heartbeat = ?2,
                cpu_usage = ?3,
                memory_usage = ?4,
                disk_usage = ?5,
                latitude = ?6,
                longitude = ?7,
                altitude = ?8,
                updated_at = ?2
             WHERE node_id = ?1",
            rusqlite::params![
                node_id,
                now,
                sample.cpu_usage,
                sample.memory_usage,
                sample.disk_usage,
                sample.latitude,
                sample.longitude,
                sample.altitude,
            ],
        )?;

        if updated == 0 {
            return Err(Error::NotFound(format!("node not found: {node_id}")));
        }
        Ok(())
    }

    /// Demote ONLINE nodes whose last heartbeat is older than the timeout
    ///
    /// Returns the number of nodes marked OFFLINE.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn mark_stale_offline(&self, heartbeat_timeout_seconds: i64) -> Result<usize> {
        let conn = self.conn()?;
        let cutoff = (Utc::now() - chrono::Duration::seconds(heartbeat_timeout_seconds)).to_rfc3339();

        let changed = conn.execute(
            "UPDATE nodes SET status = 'offline', updated_at = ?1
             WHERE status = 'online' AND (last_heartbeat IS NULL OR last_heartbeat < ?2)",
            rusqlite::params![Utc::now().to_rfc3339(), cutoff],
        )?;
        Ok(changed)
    }

    /// List nodes with filters and pagination, newest registrations first
    ///
    /// Returns the page of nodes and the total matching count.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self, filter: &NodeFilter, page: usize, page_size: usize) -> Result<(Vec<Node>, i64)> {
        let conn = self.conn()?;

        let mut clauses = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(status) = filter.status {
            clauses.push(format!("status = ?{}", params.len() + 1));
            params.push(Box::new(status.as_str().to_string()));
        }
        if let Some(node_type) = &filter.node_type {
            clauses.push(format!("node_type = ?{}", params.len() + 1));
            params.push(Box::new(node_type.clone()));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(id) FROM nodes {where_clause}"),
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            |row| row.get(0),
        )?;

        let offset = page.saturating_sub(1) * page_size;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM nodes {where_clause}
             ORDER BY registered_at DESC LIMIT {page_size} OFFSET {offset}"
        ))?;

        let nodes = stmt
            .query_map(
                rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
                node_from_row,
            )?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok((nodes, total))
    }

    /// Delete a node; commands and telemetry cascade
    ///
    /// Returns whether a node was removed.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete(&self, node_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM nodes WHERE node_id = ?1", [node_id])?;
        Ok(deleted > 0)
    }
}

fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        id: row.get(0)?,
        node_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        node_type: row.get(4)?,
        status: NodeStatus::parse(&row.get::<_, String>(5)?).unwrap_or(NodeStatus::Unknown),
        last_heartbeat: row
            .get::<_, Option<String>>(6)?
            .map(|s| parse_datetime(&s)),
        cpu_usage: row.get(7)?,
        memory_usage: row.get(8)?,
        disk_usage: row.get(9)?,
        latitude: row.get(10)?,
        longitude: row.get(11)?,
        altitude: row.get(12)?,
        ip_address: row.get(13)?,
        mac_address: row.get(14)?,
        auth_token: row.get(15)?,
        metadata: row
            .get::<_, Option<String>>(16)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        registered_at: parse_datetime(&row.get::<_, String>(17)?),
        updated_at: parse_datetime(&row.get::<_, String>(18)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn setup() -> NodeRepo {
        NodeRepo::new(init_memory().unwrap())
    }

    fn registration(node_id: &str) -> NodeRegistration {
        NodeRegistration {
            node_id: node_id.to_string(),
            name: Some("Edge unit".to_string()),
            node_type: Some("sensor".to_string()),
            ip_address: Some("10.0.0.7".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn register_creates_online_node() {
        let repo = setup();
        let (node, created) = repo.register(&registration("edge-1"), "token-a").unwrap();
        assert!(created);
        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(node.auth_token.as_deref(), Some("token-a"));
        assert!(node.last_heartbeat.is_some());
    }

    #[test]
    fn reregistration_replaces_token_and_keeps_fields() {
        let repo = setup();
        repo.register(&registration("edge-1"), "token-a").unwrap();

        // re-register with a sparse payload: name should survive
        let sparse = NodeRegistration {
            node_id: "edge-1".to_string(),
            ..Default::default()
        };
        let (node, created) = repo.register(&sparse, "token-b").unwrap();
        assert!(!created);
        assert_eq!(node.auth_token.as_deref(), Some("token-b"));
        assert_eq!(node.name.as_deref(), Some("Edge unit"));
        assert_eq!(node.node_type.as_deref(), Some("sensor"));
    }

    #[test]
    fn heartbeat_updates_snapshot() {
        let repo = setup();
        repo.register(&registration("edge-1"), "tok").unwrap();

        let sample = TelemetrySample {
            cpu_usage: Some(12.0),
            disk_usage: Some(80.5),
            ..Default::default()
        };
        repo.record_heartbeat("edge-1", &sample).unwrap();

        let node = repo.find("edge-1").unwrap().unwrap();
        assert_eq!(node.cpu_usage, Some(12.0));
        assert_eq!(node.disk_usage, Some(80.5));
        assert_eq!(node.memory_usage, None);
    }

    #[test]
    fn heartbeat_for_unknown_node_is_not_found() {
        let repo = setup();
        let err = repo.record_heartbeat("ghost", &TelemetrySample::default());
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[test]
    fn stale_sweep_demotes_online_nodes() {
        let repo = setup();
        repo.register(&registration("edge-1"), "tok").unwrap();

        // a negative timeout makes every node stale
        let demoted = repo.mark_stale_offline(-1).unwrap();
        assert_eq!(demoted, 1);
        let node = repo.find("edge-1").unwrap().unwrap();
        assert_eq!(node.status, NodeStatus::Offline);

        // already-offline nodes are not touched again
        assert_eq!(repo.mark_stale_offline(-1).unwrap(), 0);
    }

    #[test]
    fn list_filters_by_status() {
        let repo = setup();
        repo.register(&registration("edge-1"), "a").unwrap();
        repo.register(&registration("edge-2"), "b").unwrap();
        repo.mark_stale_offline(-1).unwrap();
        repo.register(&registration("edge-1"), "c").unwrap();

        let (online, total) = repo
            .list(
                &NodeFilter {
                    status: Some(NodeStatus::Online),
                    node_type: None,
                },
                1,
                50,
            )
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(online[0].node_id, "edge-1");
    }

    #[test]
    fn delete_removes_node() {
        let repo = setup();
        repo.register(&registration("edge-1"), "tok").unwrap();
        assert!(repo.delete("edge-1").unwrap());
        assert!(!repo.delete("edge-1").unwrap());
        assert!(repo.find("edge-1").unwrap().is_none());
    }
}
