//! Query Surface: read-only operations backing the HTTP layer. No write
//! path lives here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::bus::EventBus;
use crate::broker::BrokerCounters;
use crate::camera::CameraCounters;
use crate::config::{KEY_BUSINESS_EVENTS, KEY_HOURLY_SUMMARY, KEY_WEATHER_AIRPORT, KEY_WEATHER_LOCAL};
use crate::correlator::CorrelatorCounters;
use crate::persister::{PersistError, PersisterCounters, SqliteStore};
use crate::radar::RadarCounters;
use crate::types::{ConsolidatedRecord, WeatherSample, WeatherSnapshot};
use crate::weather::WeatherCounters;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Store(#[from] PersistError),
}

/// Snapshot of every worker's counters, composed fresh on each read by
/// copying each `AtomicU64` rather than holding a lock across the read.
#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub radar_lines_read: u64,
    pub radar_lines_unparseable: u64,
    pub radar_detections_published: u64,
    pub radar_serial_errors: u64,
    pub weather_reads_attempted: u64,
    pub weather_reads_failed: u64,
    pub camera_messages_received: u64,
    pub camera_messages_dropped: u64,
    pub correlator_messages_processed: u64,
    pub correlator_groups_created: u64,
    pub correlator_groups_extended: u64,
    pub correlator_camera_correlated: u64,
    pub correlator_camera_fallback: u64,
    pub correlator_publish_failures: u64,
    pub persister_messages_processed: u64,
    pub persister_secondary_failures: u64,
    pub persister_retention_rows_deleted: u64,
    pub broker_messages_relayed: u64,
    pub broker_messages_dropped_backpressure: u64,
    pub broker_subscribers_connected: u64,
    pub status: &'static str,
}

pub struct QuerySurface {
    bus: Arc<dyn EventBus>,
    store: Arc<SqliteStore>,
    radar_counters: Arc<RadarCounters>,
    weather_counters: Arc<WeatherCounters>,
    camera_counters: Arc<CameraCounters>,
    correlator_counters: Arc<CorrelatorCounters>,
    persister_counters: Arc<PersisterCounters>,
    broker_counters: Arc<BrokerCounters>,
}

impl QuerySurface {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<dyn EventBus>,
        store: Arc<SqliteStore>,
        radar_counters: Arc<RadarCounters>,
        weather_counters: Arc<WeatherCounters>,
        camera_counters: Arc<CameraCounters>,
        correlator_counters: Arc<CorrelatorCounters>,
        persister_counters: Arc<PersisterCounters>,
        broker_counters: Arc<BrokerCounters>,
    ) -> Self {
        Self {
            bus,
            store,
            radar_counters,
            weather_counters,
            camera_counters,
            correlator_counters,
            persister_counters,
            broker_counters,
        }
    }

    /// Newest-first, bounded to 1000 regardless of the caller's `limit`.
    pub async fn recent_consolidated(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConsolidatedRecord>, QueryError> {
        Ok(self.store.recent_consolidated(limit, since).await?)
    }

    /// Tails the bounded list of noteworthy (high-alert) consolidated
    /// records, independent of the SQLite-backed history.
    pub async fn recent_business_events(&self, limit: usize) -> Vec<ConsolidatedRecord> {
        let Ok(raw) = self.bus.read_bounded_list(KEY_BUSINESS_EVENTS, limit).await else {
            return Vec::new();
        };
        raw.iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect()
    }

    pub async fn recent_hourly_summaries(&self, limit: usize) -> Vec<serde_json::Value> {
        let Ok(raw) = self.bus.read_bounded_list(KEY_HOURLY_SUMMARY, limit).await else {
            return Vec::new();
        };
        raw.iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect()
    }

    pub async fn latest_weather(&self) -> WeatherSnapshot {
        let local = self.fetch_weather(KEY_WEATHER_LOCAL).await;
        let airport = self.fetch_weather(KEY_WEATHER_AIRPORT).await;
        WeatherSnapshot { local, airport }
    }

    async fn fetch_weather(&self, key: &str) -> Option<WeatherSample> {
        match self.bus.get_latest(key).await {
            Ok(Some(json)) => serde_json::from_str(&json).ok(),
            _ => None,
        }
    }

    /// Composes per-component counters into one snapshot; never touches a
    /// lock, each counter set is its own `Arc`-shared atomics.
    pub fn health(&self) -> HealthSnapshot {
        use std::sync::atomic::Ordering::Relaxed;

        let publish_failures = self.correlator_counters.publish_failures.load(Relaxed);
        let secondary_failures = self.persister_counters.secondary_failures.load(Relaxed);
        let serial_errors = self.radar_counters.serial_errors.load(Relaxed);
        let status = if publish_failures > 0 || secondary_failures > 10 || serial_errors > 0 {
            "degraded"
        } else {
            "healthy"
        };

        HealthSnapshot {
            radar_lines_read: self.radar_counters.lines_read.load(Relaxed),
            radar_lines_unparseable: self.radar_counters.lines_unparseable.load(Relaxed),
            radar_detections_published: self.radar_counters.detections_published.load(Relaxed),
            radar_serial_errors: self.radar_counters.serial_errors.load(Relaxed),
            weather_reads_attempted: self.weather_counters.reads_attempted.load(Relaxed),
            weather_reads_failed: self.weather_counters.reads_failed.load(Relaxed),
            camera_messages_received: self.camera_counters.messages_received.load(Relaxed),
            camera_messages_dropped: self.camera_counters.messages_dropped.load(Relaxed),
            correlator_messages_processed: self.correlator_counters.messages_processed.load(Relaxed),
            correlator_groups_created: self.correlator_counters.groups_created.load(Relaxed),
            correlator_groups_extended: self.correlator_counters.groups_extended.load(Relaxed),
            correlator_camera_correlated: self.correlator_counters.camera_correlated.load(Relaxed),
            correlator_camera_fallback: self.correlator_counters.camera_fallback.load(Relaxed),
            correlator_publish_failures: publish_failures,
            persister_messages_processed: self.persister_counters.messages_processed.load(Relaxed),
            persister_secondary_failures: secondary_failures,
            persister_retention_rows_deleted: self.persister_counters.retention_rows_deleted.load(Relaxed),
            broker_messages_relayed: self.broker_counters.messages_relayed.load(Relaxed),
            broker_messages_dropped_backpressure: self.broker_counters.messages_dropped_backpressure.load(Relaxed),
            broker_subscribers_connected: self.broker_counters.subscribers_connected.load(Relaxed),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::config;
    use crate::persister::SqliteStore;

    fn surface(bus: Arc<dyn EventBus>) -> QuerySurface {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        QuerySurface::new(
            bus,
            store,
            Arc::new(RadarCounters::default()),
            Arc::new(WeatherCounters::default()),
            Arc::new(CameraCounters::default()),
            Arc::new(CorrelatorCounters::default()),
            Arc::new(PersisterCounters::default()),
            Arc::new(BrokerCounters::default()),
        )
    }

    #[tokio::test]
    async fn health_reports_healthy_with_no_activity() {
        if !config::is_initialized() {
            config::init(config::Config::for_tests());
        }
        let bus = Arc::new(InMemoryBus::new());
        let q = surface(bus);
        assert_eq!(q.health().status, "healthy");
    }

    #[tokio::test]
    async fn health_degrades_on_publish_failures() {
        if !config::is_initialized() {
            config::init(config::Config::for_tests());
        }
        let bus = Arc::new(InMemoryBus::new());
        let q = surface(bus);
        q.correlator_counters
            .publish_failures
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(q.health().status, "degraded");
    }

    #[tokio::test]
    async fn recent_business_events_round_trips_through_bus() {
        if !config::is_initialized() {
            config::init(config::Config::for_tests());
        }
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
        let q = surface(bus.clone());
        assert!(q.recent_business_events(10).await.is_empty());
    }
}
