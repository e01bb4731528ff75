//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Operator accounts
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT UNIQUE,
            hashed_password TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('admin', 'operator', 'observer')),
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            last_login TEXT
        );

        -- Registered edge nodes
        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            node_id TEXT NOT NULL UNIQUE,
            name TEXT,
            description TEXT,
            node_type TEXT,
            status TEXT NOT NULL DEFAULT 'unknown'
                CHECK(status IN ('online', 'offline', 'degraded', 'unknown')),
            last_heartbeat TEXT,
            cpu_usage REAL,
            memory_usage REAL,
            disk_usage REAL,
            latitude REAL,
            longitude REAL,
            altitude REAL,
            ip_address TEXT,
            mac_address TEXT,
            auth_token TEXT,
            metadata TEXT,
            registered_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(status);

        -- Commands dispatched to nodes
        CREATE TABLE IF NOT EXISTS commands (
            id TEXT PRIMARY KEY,
            command_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending', 'sent', 'acknowledged', 'completed', 'failed', 'timeout')),
            node_id TEXT NOT NULL REFERENCES nodes(node_id) ON DELETE CASCADE,
            payload TEXT,
            result TEXT,
            error TEXT,
            created_by TEXT REFERENCES users(id),
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            sent_at TEXT,
            acknowledged_at TEXT,
            completed_at TEXT
        );

        -- Heartbeat claim scans by node + status, FIFO on created_at
        CREATE INDEX IF NOT EXISTS idx_commands_node_status
            ON commands(node_id, status, created_at);

        -- Time-series telemetry samples
        CREATE TABLE IF NOT EXISTS telemetry_records (
            id TEXT PRIMARY KEY,
            node_id TEXT NOT NULL REFERENCES nodes(node_id) ON DELETE CASCADE,
            cpu_usage REAL,
            memory_usage REAL,
            disk_usage REAL,
            latitude REAL,
            longitude REAL,
            altitude REAL,
            custom_metrics TEXT,
            recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_telemetry_node
            ON telemetry_records(node_id, recorded_at);

        -- Global and per-node configuration items
        CREATE TABLE IF NOT EXISTS configurations (
            id TEXT PRIMARY KEY,
            key TEXT NOT NULL,
            value TEXT,
            scope TEXT NOT NULL DEFAULT 'global',
            node_id TEXT REFERENCES nodes(node_id) ON DELETE CASCADE,
            description TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- NULL node_id means global scope; COALESCE keeps those rows unique too
        CREATE UNIQUE INDEX IF NOT EXISTS idx_configurations_key_scope
            ON configurations(key, scope, COALESCE(node_id, ''));

        -- Operator action audit trail
        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            username TEXT,
            action TEXT NOT NULL,
            resource_type TEXT,
            resource_id TEXT,
            details TEXT,
            success INTEGER NOT NULL DEFAULT 1,
            error_message TEXT,
            timestamp TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_logs(timestamp);

        PRAGMA user_version = 1;
        ",
    )?;

    Ok(())
}
