//! Audit trail for operator actions

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::DbPool;
use super::user::parse_datetime;
use crate::{Error, Result};

/// An audit event to record
#[derive(Debug, Clone, Default)]
pub struct AuditEntry<'a> {
    pub user_id: Option<&'a str>,
    pub username: Option<&'a str>,
    pub action: &'a str,
    pub resource_type: Option<&'a str>,
    pub resource_id: Option<&'a str>,
    pub details: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<&'a str>,
}

impl<'a> AuditEntry<'a> {
    /// A successful action
    #[must_use]
    pub fn success(action: &'a str) -> Self {
        Self {
            action,
            success: true,
            ..Default::default()
        }
    }

    /// A failed action
    #[must_use]
    pub fn failure(action: &'a str, error_message: &'a str) -> Self {
        Self {
            action,
            success: false,
            error_message: Some(error_message),
            ..Default::default()
        }
    }
}

/// A stored audit record
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Audit repository
#[derive(Clone)]
pub struct AuditRepo {
    pool: DbPool,
}

impl AuditRepo {
    /// Create a new audit repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append an audit record
    ///
    /// Failures here are logged, not propagated: the audited action already
    /// happened and must not be rolled back by bookkeeping.
    pub fn record(&self, entry: &AuditEntry<'_>) {
        if let Err(e) = self.try_record(entry) {
            tracing::error!(action = entry.action, error = %e, "failed to write audit record");
        }
    }

    fn try_record(&self, entry: &AuditEntry<'_>) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let details = entry.details.as_ref().map(serde_json::to_string).transpose()?;

        conn.execute(
            "INSERT INTO audit_logs
                (id, user_id, username, action, resource_type, resource_id,
                 details, success, error_message, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                entry.user_id,
                entry.username,
                entry.action,
                entry.resource_type,
                entry.resource_id,
                details,
                entry.success,
                entry.error_message,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List audit records, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self, page: usize, page_size: usize) -> Result<(Vec<AuditRecord>, i64)> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let total: i64 =
            conn.query_row("SELECT COUNT(id) FROM audit_logs", [], |row| row.get(0))?;

        let offset = page.saturating_sub(1) * page_size;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, user_id, username, action, resource_type, resource_id,
                    details, success, error_message, timestamp
             FROM audit_logs
             ORDER BY timestamp DESC LIMIT {page_size} OFFSET {offset}"
        ))?;

        let records = stmt
            .query_map([], |row| {
                Ok(AuditRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    username: row.get(2)?,
                    action: row.get(3)?,
                    resource_type: row.get(4)?,
                    resource_id: row.get(5)?,
                    details: row
                        .get::<_, Option<String>>(6)?
                        .and_then(|s| serde_json::from_str(&s).ok()),
                    success: row.get(7)?,
                    error_message: row.get(8)?,
                    timestamp: parse_datetime(&row.get::<_, String>(9)?),
                })
            })?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok((records, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    #[test]
    fn record_and_list() {
        let repo = AuditRepo::new(init_memory().unwrap());

        let mut entry = AuditEntry::success("node_registered");
        entry.resource_type = Some("node");
        entry.resource_id = Some("edge-1");
        entry.details = Some(serde_json::json!({"node_type": "sensor"}));
        repo.record(&entry);

        repo.record(&AuditEntry::failure("login_failed", "invalid credentials"));

        let (records, total) = repo.list(1, 50).unwrap();
        assert_eq!(total, 2);
        assert_eq!(records[0].action, "login_failed");
        assert!(!records[0].success);
        assert_eq!(records[1].resource_id.as_deref(), Some("edge-1"));
    }
}
