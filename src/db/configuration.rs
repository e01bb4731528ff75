//! Global and per-node configuration storage

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::DbPool;
use super::user::parse_datetime;
use crate::{Error, Result};

/// A configuration item, global or scoped to one node
#[derive(Debug, Clone, Serialize)]
pub struct ConfigItem {
    pub id: String,
    pub key: String,
    pub value: Option<serde_json::Value>,
    pub scope: String,
    pub node_id: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Configuration repository
#[derive(Clone)]
pub struct ConfigRepo {
    pool: DbPool,
}

const COLUMNS: &str = "id, key, value, scope, node_id, description, created_at, updated_at";

impl ConfigRepo {
    /// Create a new configuration repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<super::DbConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    /// Insert or update a configuration item
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn upsert(
        &self,
        key: &str,
        value: &serde_json::Value,
        node_id: Option<&str>,
        description: Option<&str>,
    ) -> Result<ConfigItem> {
        let conn = self.conn()?;
        let scope = if node_id.is_some() { "node" } else { "global" };
        let now = Utc::now().to_rfc3339();
        let value_json = serde_json::to_string(value)?;

        let updated = conn.execute(
            "UPDATE configurations SET
                value = ?3, description = COALESCE(?4, description), updated_at = ?5
             WHERE key = ?1 AND (node_id = ?2 OR (?2 IS NULL AND node_id IS NULL))",
            rusqlite::params![key, node_id, value_json, description, now],
        )?;

        if updated == 0 {
            conn.execute(
                "INSERT INTO configurations
                    (id, key, value, scope, node_id, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    key,
                    value_json,
                    scope,
                    node_id,
                    description,
                    now,
                ],
            )?;
        }

        let item = conn.query_row(
            &format!(
                "SELECT {COLUMNS} FROM configurations
                 WHERE key = ?1 AND (node_id = ?2 OR (?2 IS NULL AND node_id IS NULL))"
            ),
            rusqlite::params![key, node_id],
            config_from_row,
        )?;
        Ok(item)
    }

    /// Fetch one configuration item
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, key: &str, node_id: Option<&str>) -> Result<Option<ConfigItem>> {
        let conn = self.conn()?;
        let item = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM configurations
                     WHERE key = ?1 AND (node_id = ?2 OR (?2 IS NULL AND node_id IS NULL))"
                ),
                rusqlite::params![key, node_id],
                config_from_row,
            )
            .ok();
        Ok(item)
    }

    /// List configuration items, optionally filtered by scope or node
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self, scope: Option<&str>, node_id: Option<&str>) -> Result<Vec<ConfigItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM configurations
             WHERE (?1 IS NULL OR scope = ?1)
               AND (?2 IS NULL OR node_id = ?2)
             ORDER BY key"
        ))?;

        let items = stmt
            .query_map(rusqlite::params![scope, node_id], config_from_row)?
            .filter_map(std::result::Result::ok)
            .collect();
        Ok(items)
    }

    /// Delete a configuration item
    ///
    /// Returns whether an item was removed.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete(&self, key: &str, node_id: Option<&str>) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM configurations
             WHERE key = ?1 AND (node_id = ?2 OR (?2 IS NULL AND node_id IS NULL))",
            rusqlite::params![key, node_id],
        )?;
        Ok(deleted > 0)
    }
}

fn config_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConfigItem> {
    Ok(ConfigItem {
        id: row.get(0)?,
        key: row.get(1)?,
        value: row
            .get::<_, Option<String>>(2)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        scope: row.get(3)?,
        node_id: row.get(4)?,
        description: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}
