//! Command repository
//!
//! Storage for the command lifecycle. The heartbeat claim path transitions
//! each candidate with a conditional UPDATE (`... WHERE status = 'pending'`)
//! so concurrent heartbeats for the same node can never double-send a
//! command; heartbeats for different nodes do not contend at all.

use chrono::Utc;

use super::DbPool;
use super::user::parse_datetime;
use crate::commands::{
    self, Command, CommandStatus, CommandType, StatusReport, lifecycle,
};
use crate::{Error, Result};

/// Commands handed out per heartbeat, FIFO by creation time
pub const HEARTBEAT_BATCH_SIZE: usize = 10;

/// Filters for listing commands
#[derive(Debug, Clone, Default)]
pub struct CommandFilter {
    pub status: Option<CommandStatus>,
    pub command_type: Option<CommandType>,
    pub node_id: Option<String>,
}

/// Command repository
#[derive(Clone)]
pub struct CommandRepo {
    pool: DbPool,
}

const COLUMNS: &str = "id, command_type, status, node_id, payload, result, error, \
                       created_by, created_at, sent_at, acknowledged_at, completed_at";

impl CommandRepo {
    /// Create a new command repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<super::DbConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    /// Persist a new pending command
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self, cmd: &Command) -> Result<()> {
        let conn = self.conn()?;
        let payload = cmd.payload.as_ref().map(serde_json::to_string).transpose()?;

        conn.execute(
            "INSERT INTO commands
                (id, command_type, status, node_id, payload, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                cmd.id,
                cmd.command_type.key(),
                cmd.status.as_str(),
                cmd.node_id,
                payload,
                cmd.created_by,
                cmd.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find a command by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, id: &str) -> Result<Option<Command>> {
        let conn = self.conn()?;
        let cmd = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM commands WHERE id = ?1"),
                [id],
                command_from_row,
            )
            .ok();
        Ok(cmd)
    }

    /// Claim the oldest pending commands for a node, transitioning each to SENT
    ///
    /// Candidates are read FIFO by `created_at`, then each is claimed with a
    /// per-command compare-and-swap; a command another heartbeat claimed in
    /// the meantime simply drops out of the batch.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn claim_pending(&self, node_id: &str, limit: usize) -> Result<Vec<Command>> {
        let conn = self.conn()?;
        let candidate_ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM commands
                 WHERE node_id = ?1 AND status = 'pending'
                 ORDER BY created_at ASC
                 LIMIT ?2",
            )?;
            stmt.query_map(rusqlite::params![node_id, limit], |row| row.get(0))?
                .filter_map(std::result::Result::ok)
                .collect()
        };

        let now = Utc::now().to_rfc3339();
        let mut claimed = Vec::with_capacity(candidate_ids.len());
        for id in candidate_ids {
            let won = conn.execute(
                "UPDATE commands SET status = 'sent', sent_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                rusqlite::params![id, now],
            )?;
            if won == 1 {
                let cmd = conn.query_row(
                    &format!("SELECT {COLUMNS} FROM commands WHERE id = ?1"),
                    [&id],
                    command_from_row,
                )?;
                claimed.push(cmd);
            }
        }
        Ok(claimed)
    }

    /// Apply a node's status report to a stored command
    ///
    /// The lifecycle rules run on a loaded copy and the write back is
    /// conditional on the status it was loaded with, retrying when another
    /// report advanced the command concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown commands and
    /// [`Error::Conflict`] for reports that contradict stored state
    pub fn apply_report(&self, id: &str, report: &StatusReport) -> Result<Command> {
        // a few attempts are plenty: each retry means another writer advanced
        // the command, and the state machine converges in two hops
        for _ in 0..3 {
            let mut cmd = self
                .find(id)?
                .ok_or_else(|| Error::NotFound(format!("command not found: {id}")))?;
            let loaded_status = cmd.status;

            let applied = lifecycle::apply_report(&mut cmd, report, Utc::now())?;
            if applied == commands::Applied::Duplicate {
                return Ok(cmd);
            }

            if self.store_transition(&cmd, loaded_status)? {
                return Ok(cmd);
            }
        }
        Err(Error::Conflict(format!(
            "command {id} kept changing underneath the report"
        )))
    }

    fn store_transition(&self, cmd: &Command, expected: CommandStatus) -> Result<bool> {
        let conn = self.conn()?;
        let result = cmd.result.as_ref().map(serde_json::to_string).transpose()?;

        let written = conn.execute(
            "UPDATE commands SET
                status = ?2,
                result = ?3,
                error = ?4,
                acknowledged_at = ?5,
                completed_at = ?6
             WHERE id = ?1 AND status = ?7",
            rusqlite::params![
                cmd.id,
                cmd.status.as_str(),
                result,
                cmd.error,
                cmd.acknowledged_at.map(|t| t.to_rfc3339()),
                cmd.completed_at.map(|t| t.to_rfc3339()),
                expected.as_str(),
            ],
        )?;
        Ok(written == 1)
    }

    /// List commands with filters and pagination, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(
        &self,
        filter: &CommandFilter,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Command>, i64)> {
        let conn = self.conn()?;

        let mut clauses = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(status) = filter.status {
            clauses.push(format!("status = ?{}", params.len() + 1));
            params.push(Box::new(status.as_str().to_string()));
        }
        if let Some(command_type) = &filter.command_type {
            clauses.push(format!("command_type = ?{}", params.len() + 1));
            params.push(Box::new(command_type.key()));
        }
        if let Some(node_id) = &filter.node_id {
            clauses.push(format!("node_id = ?{}", params.len() + 1));
            params.push(Box::new(node_id.clone()));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(id) FROM commands {where_clause}"),
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            |row| row.get(0),
        )?;

        let offset = page.saturating_sub(1) * page_size;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM commands {where_clause}
             ORDER BY created_at DESC LIMIT {page_size} OFFSET {offset}"
        ))?;

        let cmds = stmt
            .query_map(
                rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
                command_from_row,
            )?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok((cmds, total))
    }

    /// Cancel a command, which is only legal while it is still pending
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown commands and
    /// [`Error::Conflict`] for commands past the pending state
    pub fn cancel(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM commands WHERE id = ?1 AND status = 'pending'",
            [id],
        )?;
        drop(conn);
        if deleted == 1 {
            return Ok(());
        }

        match self.find(id)? {
            None => Err(Error::NotFound(format!("command not found: {id}"))),
            Some(cmd) => Err(Error::Conflict(format!(
                "cannot cancel command in status {}",
                cmd.status
            ))),
        }
    }

    /// Time out non-terminal commands older than the horizon
    ///
    /// This is the hook an external sweeper calls; nothing in the core
    /// schedules it.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn timeout_overdue(&self, horizon_seconds: i64) -> Result<usize> {
        let conn = self.conn()?;
        let now = Utc::now();
        let cutoff = (now - chrono::Duration::seconds(horizon_seconds)).to_rfc3339();

        let changed = conn.execute(
            "UPDATE commands SET status = 'timeout', completed_at = ?1
             WHERE status IN ('pending', 'sent', 'acknowledged') AND created_at < ?2",
            rusqlite::params![now.to_rfc3339(), cutoff],
        )?;
        Ok(changed)
    }
}

fn command_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Command> {
    let type_str: String = row.get(1)?;
    let status_str: String = row.get(2)?;
    Ok(Command {
        id: row.get(0)?,
        command_type: serde_json::from_value(serde_json::Value::String(type_str.clone()))
            .unwrap_or(CommandType::Other(type_str)),
        status: CommandStatus::parse(&status_str).unwrap_or(CommandStatus::Pending),
        node_id: row.get(3)?,
        payload: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        result: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        error: row.get(6)?,
        created_by: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        sent_at: row.get::<_, Option<String>>(9)?.map(|s| parse_datetime(&s)),
        acknowledged_at: row
            .get::<_, Option<String>>(10)?
            .map(|s| parse_datetime(&s)),
        completed_at: row
            .get::<_, Option<String>>(11)?
            .map(|s| parse_datetime(&s)),
    })
}
