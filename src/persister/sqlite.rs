//! The primary store: SQLite, WAL mode, `synchronous=NORMAL`, upsert keyed
//! on `consolidation_id`. `rusqlite::Connection` is `Send` but not `Sync`;
//! every call locks a `std::sync::Mutex` inside a `spawn_blocking` task, the
//! usual shape for driving a blocking DB handle from an async worker.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::PersistError;
use super::schema::SCHEMA_SQL;
use crate::types::ConsolidatedRecord;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, PersistError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, for tests: same schema, no file on disk.
    pub fn open_in_memory() -> Result<Self, PersistError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Upsert one consolidated record across all three tables in a single
    /// transaction.
    pub async fn upsert_consolidated(&self, record: ConsolidatedRecord) -> Result<(), PersistError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().expect("sqlite mutex poisoned");
            let tx = guard.transaction()?;

            let event_json = serde_json::to_string(&record)?;
            tx.execute(
                "INSERT INTO consolidated_events (consolidation_id, event_json, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(consolidation_id) DO UPDATE SET event_json = excluded.event_json, created_at = excluded.created_at",
                params![
                    record.consolidation_id,
                    event_json,
                    record.timestamp.timestamp() as f64
                ],
            )?;

            tx.execute(
                "INSERT INTO traffic_detections (id, timestamp, correlation_id, trigger_source, confidence_score, vehicle_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    timestamp = excluded.timestamp,
                    correlation_id = excluded.correlation_id,
                    trigger_source = excluded.trigger_source,
                    confidence_score = excluded.confidence_score,
                    vehicle_count = excluded.vehicle_count",
                params![
                    record.radar_data.detection_id,
                    record.timestamp.timestamp() as f64,
                    record.correlation_id,
                    record.trigger_source,
                    record.camera_data.primary_confidence,
                    record.camera_data.vehicle_count,
                ],
            )?;

            tx.execute(
                "DELETE FROM radar_detections WHERE detection_id = ?1",
                params![record.radar_data.detection_id],
            )?;
            tx.execute(
                "INSERT INTO radar_detections (detection_id, speed_mph, speed_mps, alert_level, direction)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.radar_data.detection_id,
                    record.radar_data.speed_mph,
                    record.radar_data.speed_mps,
                    record.radar_data.alert_level.as_str(),
                    record.radar_data.direction,
                ],
            )?;

            tx.commit()?;
            Ok::<(), PersistError>(())
        })
        .await
        .map_err(|e| PersistError::JoinError(e.to_string()))??;
        Ok(())
    }

    /// Delete rows older than `retention_days`. Returns the number of
    /// `consolidated_events` rows removed.
    pub async fn cleanup_retention(&self, retention_days: i64) -> Result<u64, PersistError> {
        let conn = self.conn.clone();
        let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).timestamp() as f64;
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("sqlite mutex poisoned");
            let removed = guard.execute(
                "DELETE FROM consolidated_events WHERE created_at < ?1",
                params![cutoff],
            )?;
            guard.execute(
                "DELETE FROM traffic_detections WHERE timestamp < ?1",
                params![cutoff],
            )?;
            guard.execute(
                "DELETE FROM radar_detections WHERE detection_id NOT IN (SELECT id FROM traffic_detections)",
                [],
            )?;
            Ok::<u64, PersistError>(removed as u64)
        })
        .await
        .map_err(|e| PersistError::JoinError(e.to_string()))?
    }

    pub async fn recent_consolidated(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConsolidatedRecord>, PersistError> {
        let conn = self.conn.clone();
        let limit = limit.min(1000);
        let since_ts = since.map(|t| t.timestamp() as f64).unwrap_or(0.0);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("sqlite mutex poisoned");
            let mut stmt = guard.prepare(
                "SELECT event_json FROM consolidated_events
                 WHERE created_at >= ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![since_ts, limit as i64], |row| {
                row.get::<_, String>(0)
            })?;
            let mut out = Vec::new();
            for row in rows {
                let json = row?;
                if let Ok(record) = serde_json::from_str::<ConsolidatedRecord>(&json) {
                    out.push(record);
                }
            }
            Ok::<Vec<ConsolidatedRecord>, PersistError>(out)
        })
        .await
        .map_err(|e| PersistError::JoinError(e.to_string()))?
    }

    /// Folds one closed hourly window into that day's `daily_summary` row:
    /// `total_detections` accumulates, `avg_speed` is recomputed as the
    /// count-weighted mean across everything folded into the day so far,
    /// and `max_speed` only ever grows.
    pub async fn upsert_daily_summary(
        &self,
        date: String,
        hour_count: i64,
        hour_avg_speed: f64,
        hour_max_speed: f64,
    ) -> Result<(), PersistError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("sqlite mutex poisoned");
            let existing: Option<(i64, f64, f64)> = guard
                .query_row(
                    "SELECT total_detections, avg_speed, max_speed FROM daily_summary WHERE date = ?1",
                    params![date],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            let (total, avg, max) = match existing {
                Some((prev_total, prev_avg, prev_max)) => {
                    let new_total = prev_total + hour_count;
                    let new_avg = if new_total == 0 {
                        0.0
                    } else {
                        (prev_avg * prev_total as f64 + hour_avg_speed * hour_count as f64)
                            / new_total as f64
                    };
                    (new_total, new_avg, prev_max.max(hour_max_speed))
                }
                None => (hour_count, hour_avg_speed, hour_max_speed),
            };

            guard.execute(
                "INSERT INTO daily_summary (date, total_detections, avg_speed, max_speed)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(date) DO UPDATE SET
                    total_detections = excluded.total_detections,
                    avg_speed = excluded.avg_speed,
                    max_speed = excluded.max_speed",
                params![date, total, avg, max],
            )?;
            Ok::<(), PersistError>(())
        })
        .await
        .map_err(|e| PersistError::JoinError(e.to_string()))??;
        Ok(())
    }

    /// Reads one day's folded summary: `(total_detections, avg_speed, max_speed)`.
    pub async fn daily_summary(&self, date: &str) -> Result<Option<(i64, f64, f64)>, PersistError> {
        let conn = self.conn.clone();
        let date = date.to_string();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("sqlite mutex poisoned");
            let row = guard
                .query_row(
                    "SELECT total_detections, avg_speed, max_speed FROM daily_summary WHERE date = ?1",
                    params![date],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            Ok::<Option<(i64, f64, f64)>, PersistError>(row)
        })
        .await
        .map_err(|e| PersistError::JoinError(e.to_string()))?
    }

    /// `None` if the summary table hasn't been touched. `Some` reads the
    /// sanity row used by `health()` to detect corruption.
    pub async fn sanity_check(&self) -> Result<bool, PersistError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("sqlite mutex poisoned");
            let ok: Option<i64> = guard
                .query_row("SELECT 1 FROM sqlite_master LIMIT 1", [], |row| row.get(0))
                .optional()?;
            Ok::<bool, PersistError>(ok.is_some())
        })
        .await
        .map_err(|e| PersistError::JoinError(e.to_string()))?
    }
}
