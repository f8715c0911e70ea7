//! Persister: consumes `traffic:consolidated`, upserts into SQLite (and,
//! best-effort, a secondary store), acks, and runs the retention sweep.

mod schema;
mod secondary;
mod sqlite;

pub use secondary::{NoopSecondaryStore, SecondaryStore};
pub use sqlite::SqliteStore;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusError, EventBus};
use crate::config::{
    self, DEFAULT_BATCH_SIZE, GROUP_PERSISTER, HOURLY_SUMMARY_HISTORY, KEY_HOURLY_SUMMARY,
    RETENTION_SWEEP_INTERVAL_SECS, STREAM_CONSOLIDATED, STREAM_CONSUME_BLOCK_SECS,
};
use crate::correlator::HourlyStats;
use crate::types::{random_hex_id, ConsolidatedRecord};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("blocking task join error: {0}")]
    JoinError(String),
}

#[derive(Default)]
pub struct PersisterCounters {
    pub messages_processed: AtomicU64,
    pub messages_dropped_invalid: AtomicU64,
    pub secondary_failures: AtomicU64,
    pub retention_rows_deleted: AtomicU64,
    pub hourly_summaries_folded: AtomicU64,
}

pub struct Persister {
    bus: Arc<dyn EventBus>,
    store: Arc<SqliteStore>,
    secondary: Arc<dyn SecondaryStore>,
    counters: Arc<PersisterCounters>,
    consumer_name: String,
    retention_days: i64,
}

impl Persister {
    pub fn new(
        bus: Arc<dyn EventBus>,
        store: Arc<SqliteStore>,
        secondary: Arc<dyn SecondaryStore>,
        retention_days: i64,
    ) -> Self {
        Self {
            bus,
            store,
            secondary,
            counters: Arc::new(PersisterCounters::default()),
            consumer_name: format!("persister-{}", random_hex_id()),
            retention_days,
        }
    }

    pub fn counters(&self) -> Arc<PersisterCounters> {
        self.counters.clone()
    }

    pub fn store(&self) -> Arc<SqliteStore> {
        self.store.clone()
    }

    pub async fn run(self, cancel: CancellationToken) {
        if let Err(e) = self
            .bus
            .ensure_group(STREAM_CONSOLIDATED, GROUP_PERSISTER)
            .await
        {
            tracing::error!(error = %e, "persister failed to ensure consumer group, exiting");
            return;
        }

        let mut last_retention_sweep = Instant::now();
        let retention_interval = Duration::from_secs(RETENTION_SWEEP_INTERVAL_SECS);
        let mut last_hourly_window: Option<DateTime<Utc>> = None;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let batch = tokio::select! {
                result = self.bus.consume_group(
                    STREAM_CONSOLIDATED,
                    GROUP_PERSISTER,
                    &self.consumer_name,
                    DEFAULT_BATCH_SIZE,
                    Duration::from_secs(STREAM_CONSUME_BLOCK_SECS),
                ) => result,
                _ = cancel.cancelled() => return,
            };

            match batch {
                Ok(entries) => {
                    for entry in entries {
                        let fields = entry.fields;
                        let Some(json) = fields.get("data") else {
                            self.counters
                                .messages_dropped_invalid
                                .fetch_add(1, Ordering::Relaxed);
                            self.ack(&entry.id).await;
                            continue;
                        };

                        let record: Result<ConsolidatedRecord, _> = serde_json::from_str(json);
                        match record {
                            Ok(record) => self.persist_and_ack(record, &entry.id).await,
                            Err(e) => {
                                self.counters
                                    .messages_dropped_invalid
                                    .fetch_add(1, Ordering::Relaxed);
                                tracing::warn!(error = %e, message_id = %entry.id, "dropped undecodable consolidated message");
                                self.ack(&entry.id).await;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "persister failed to read consolidated stream");
                }
            }

            self.fold_hourly_summaries(&mut last_hourly_window).await;

            if last_retention_sweep.elapsed() >= retention_interval {
                self.run_retention_sweep().await;
                last_retention_sweep = Instant::now();
            }
        }
    }

    /// Folds every hourly window pushed to `KEY_HOURLY_SUMMARY` since
    /// `last_seen` into `daily_summary`, oldest first, then advances
    /// `last_seen` to the newest window folded. The bounded list only keeps
    /// the most recent `HOURLY_SUMMARY_HISTORY` windows, so a persister that
    /// falls behind by more than that loses the gap — acceptable for a
    /// read-mostly daily rollup, unlike the durable consolidated stream.
    async fn fold_hourly_summaries(&self, last_seen: &mut Option<DateTime<Utc>>) {
        let raw = match self
            .bus
            .read_bounded_list(KEY_HOURLY_SUMMARY, HOURLY_SUMMARY_HISTORY)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read hourly summary list");
                return;
            }
        };

        let mut windows: Vec<HourlyStats> = raw
            .iter()
            .filter_map(|json| serde_json::from_str::<HourlyStats>(json).ok())
            .filter(|w| match *last_seen {
                Some(seen) => w.window_start > seen,
                None => true,
            })
            .collect();
        windows.sort_by_key(|w| w.window_start);

        for window in windows {
            let date = window.window_start.format("%Y-%m-%d").to_string();
            match self
                .store
                .upsert_daily_summary(
                    date,
                    window.vehicle_count as i64,
                    window.mean_speed_mph(),
                    window.max_speed_mph,
                )
                .await
            {
                Ok(()) => {
                    self.counters
                        .hourly_summaries_folded
                        .fetch_add(1, Ordering::Relaxed);
                    *last_seen = Some(window.window_start);
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to fold hourly summary into daily_summary");
                    break;
                }
            }
        }
    }

    async fn persist_and_ack(&self, record: ConsolidatedRecord, message_id: &str) {
        let secondary_record = record.clone();
        match self.store.upsert_consolidated(record).await {
            Ok(()) => {
                self.counters.messages_processed.fetch_add(1, Ordering::Relaxed);
                self.ack(message_id).await;
            }
            Err(e) => {
                tracing::error!(error = %e, message_id, "primary store upsert failed, not acking");
                return; // leave pending: redelivery will retry
            }
        }

        if let Err(e) = self.secondary.upsert(&secondary_record).await {
            self.counters.secondary_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "secondary store upsert failed, primary is authoritative");
        }
    }

    async fn run_retention_sweep(&self) {
        match self.store.cleanup_retention(self.retention_days).await {
            Ok(deleted) => {
                self.counters
                    .retention_rows_deleted
                    .fetch_add(deleted, Ordering::Relaxed);
                if deleted > 0 {
                    tracing::info!(deleted, retention_days = self.retention_days, "retention sweep complete");
                }
            }
            Err(e) => tracing::error!(error = %e, "retention sweep failed"),
        }
    }

    async fn ack(&self, message_id: &str) {
        if let Err(e) = self
            .bus
            .ack(STREAM_CONSOLIDATED, GROUP_PERSISTER, message_id)
            .await
        {
            let bus_err: BusError = e;
            tracing::error!(error = %bus_err, message_id, "failed to ack consolidated message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Fields, InMemoryBus};
    use crate::types::{
        AlertLevel, CameraData, ConsolidationMethod, ProcessingMetadata, RadarData, SourceFormat,
        WeatherSnapshot,
    };
    use chrono::Utc;

    fn record() -> ConsolidatedRecord {
        ConsolidatedRecord {
            consolidation_id: random_hex_id(),
            correlation_id: random_hex_id(),
            timestamp: Utc::now(),
            trigger_source: "radar",
            radar_data: RadarData {
                detection_id: random_hex_id(),
                speed_mph: 30.0,
                speed_mps: 13.4,
                alert_level: AlertLevel::High,
                direction: "receding",
                source_format: SourceFormat::Csv,
            },
            weather_data: WeatherSnapshot::default(),
            camera_data: CameraData::fallback(),
            processing_metadata: ProcessingMetadata {
                sources_used: vec!["radar"],
                consolidation_method: ConsolidationMethod::RadarOnly,
            },
        }
    }

    #[tokio::test]
    async fn persists_and_acks_valid_message() {
        if !config::is_initialized() {
            config::init(config::Config::for_tests());
        }
        let bus = Arc::new(InMemoryBus::new());
        bus.ensure_group(STREAM_CONSOLIDATED, GROUP_PERSISTER).await.unwrap();

        let rec = record();
        let json = serde_json::to_string(&rec).unwrap();
        let mut fields = Fields::new();
        fields.insert("data".to_string(), json);
        bus.publish_stream(STREAM_CONSOLIDATED, fields).await.unwrap();

        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let persister = Persister::new(
            bus.clone(),
            store.clone(),
            Arc::new(NoopSecondaryStore),
            90,
        );

        let entries = bus
            .consume_group(STREAM_CONSOLIDATED, GROUP_PERSISTER, "p1", 10, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        let fields = entries[0].fields.clone();
        let decoded: ConsolidatedRecord =
            serde_json::from_str(fields.get("data").unwrap()).unwrap();
        persister.persist_and_ack(decoded, &entries[0].id).await;

        assert_eq!(persister.counters.messages_processed.load(Ordering::Relaxed), 1);

        let recent = store.recent_consolidated(10, None).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].consolidation_id, rec.consolidation_id);
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        if !config::is_initialized() {
            config::init(config::Config::for_tests());
        }
        let store = SqliteStore::open_in_memory().unwrap();
        let rec = record();
        store.upsert_consolidated(rec.clone()).await.unwrap();
        store.upsert_consolidated(rec.clone()).await.unwrap();

        let recent = store.recent_consolidated(10, None).await.unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn folds_hourly_summary_into_daily_summary() {
        if !config::is_initialized() {
            config::init(config::Config::for_tests());
        }
        let bus = Arc::new(InMemoryBus::new());
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let persister = Persister::new(bus.clone(), store.clone(), Arc::new(NoopSecondaryStore), 90);

        let window_start = Utc::now();
        let json = serde_json::json!({
            "window_start": window_start,
            "vehicle_count": 4,
            "noise": 0,
            "normal": 1,
            "low": 1,
            "high": 2,
            "max_speed_mph": 42.0,
            "speed_sum": 120.0,
        })
        .to_string();
        bus.push_bounded_list(config::KEY_HOURLY_SUMMARY, &json, config::HOURLY_SUMMARY_HISTORY)
            .await
            .unwrap();

        let mut last_seen = None;
        persister.fold_hourly_summaries(&mut last_seen).await;

        assert_eq!(
            persister.counters.hourly_summaries_folded.load(Ordering::Relaxed),
            1
        );
        assert_eq!(last_seen, Some(window_start));

        let date = window_start.format("%Y-%m-%d").to_string();
        let (total, avg, max) = store.daily_summary(&date).await.unwrap().unwrap();
        assert_eq!(total, 4);
        assert!((avg - 30.0).abs() < 1e-9);
        assert!((max - 42.0).abs() < 1e-9);

        // A second window the same day folds in rather than overwriting.
        let window_start_2 = window_start + chrono::Duration::minutes(1);
        let json2 = serde_json::json!({
            "window_start": window_start_2,
            "vehicle_count": 1,
            "noise": 0,
            "normal": 0,
            "low": 0,
            "high": 1,
            "max_speed_mph": 50.0,
            "speed_sum": 50.0,
        })
        .to_string();
        bus.push_bounded_list(config::KEY_HOURLY_SUMMARY, &json2, config::HOURLY_SUMMARY_HISTORY)
            .await
            .unwrap();
        persister.fold_hourly_summaries(&mut last_seen).await;

        let (total, _avg, max) = store.daily_summary(&date).await.unwrap().unwrap();
        assert_eq!(total, 5);
        assert!((max - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn retention_cleanup_removes_old_rows() {
        if !config::is_initialized() {
            config::init(config::Config::for_tests());
        }
        let store = SqliteStore::open_in_memory().unwrap();
        let mut rec = record();
        rec.timestamp = Utc::now() - chrono::Duration::days(200);
        store.upsert_consolidated(rec).await.unwrap();

        let deleted = store.cleanup_retention(90).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.recent_consolidated(10, None).await.unwrap().is_empty());
    }
}
