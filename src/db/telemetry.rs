//! Telemetry sample persistence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DbPool;
use super::user::parse_datetime;
use crate::{Error, Result};

/// One telemetry reading reported in a heartbeat
///
/// Every field is optional: a node reports what its metrics source can
/// supply, and absent fields stay absent rather than defaulting to zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySample {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_usage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_metrics: Option<serde_json::Value>,
}

/// A stored telemetry sample
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub id: String,
    pub node_id: String,
    #[serde(flatten)]
    pub sample: TelemetrySample,
    pub recorded_at: DateTime<Utc>,
}

/// Telemetry repository
#[derive(Clone)]
pub struct TelemetryRepo {
    pool: DbPool,
}

impl TelemetryRepo {
    /// Create a new telemetry repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a sample for a node
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn insert(&self, node_id: &str, sample: &TelemetrySample) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let custom = sample
            .custom_metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT INTO telemetry_records
                (id, node_id, cpu_usage, memory_usage, disk_usage,
                 latitude, longitude, altitude, custom_metrics, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                node_id,
                sample.cpu_usage,
                sample.memory_usage,
                sample.disk_usage,
                sample.latitude,
                sample.longitude,
                sample.altitude,
                custom,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent samples for a node, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn recent(&self, node_id: &str, limit: usize) -> Result<Vec<TelemetryRecord>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT id, node_id, cpu_usage, memory_usage, disk_usage,
                    latitude, longitude, altitude, custom_metrics, recorded_at
             FROM telemetry_records
             WHERE node_id = ?1
             ORDER BY recorded_at DESC
             LIMIT ?2",
        )?;

        let records = stmt
            .query_map(rusqlite::params![node_id, limit], |row| {
                Ok(TelemetryRecord {
                    id: row.get(0)?,
                    node_id: row.get(1)?,
                    sample: TelemetrySample {
                        cpu_usage: row.get(2)?,
                        memory_usage: row.get(3)?,
                        disk_usage: row.get(4)?,
                        latitude: row.get(5)?,
                        longitude: row.get(6)?,
                        altitude: row.get(7)?,
                        custom_metrics: row
                            .get::<_, Option<String>>(8)?
                            .and_then(|s| serde_json::from_str(&s).ok()),
                    },
                    recorded_at: parse_datetime(&row.get::<_, String>(9)?),
                })
            })?
            .filter_map(std::result::Result::ok)
            .collect();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::node::{NodeRegistration, NodeRepo};
    use crate::db::init_memory;

    #[test]
    fn insert_preserves_absent_fields() {
        let pool = init_memory().unwrap();
        let nodes = NodeRepo::new(pool.clone());
        nodes
            .register(&NodeRegistration {
                node_id: "edge-1".to_string(),
                ..Default::default()
            }, "tok")
            .unwrap();

        let repo = TelemetryRepo::new(pool);
        let sample = TelemetrySample {
            cpu_usage: Some(42.5),
            ..Default::default()
        };
        repo.insert("edge-1", &sample).unwrap();

        let records = repo.recent("edge-1", 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sample.cpu_usage, Some(42.5));
        assert_eq!(records[0].sample.memory_usage, None);
        assert_eq!(records[0].sample.custom_metrics, None);
    }
}
