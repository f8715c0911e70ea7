//! Correlator: consumes raw radar detections, groups duplicates, correlates
//! camera and weather context, and emits `ConsolidatedRecord`s.

mod groups;
mod hourly;

pub use groups::{GroupOutcome, GroupTable};
pub use hourly::{HourlyAccumulator, HourlyStats};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusError, EventBus, Fields, StreamEntry};
use crate::camera::CameraRing;
use crate::config::{
    self, BUSINESS_EVENTS_HISTORY, CAMERA_WINDOW_SECS, CHANNEL_CONSOLIDATED_QUEUED,
    CORRELATOR_BATCH_SIZE, GROUP_CONSOLIDATOR, GROUP_SWEEP_INTERVAL_SECS, HOURLY_SUMMARY_HISTORY,
    KEY_BUSINESS_EVENTS, KEY_HOURLY_SUMMARY, KEY_WEATHER_AIRPORT, KEY_WEATHER_LOCAL,
    STREAM_CONSOLIDATED, STREAM_CONSUME_BLOCK_SECS, STREAM_RADAR,
};
use crate::types::{
    random_hex_id, AlertLevel, CameraData, ConsolidatedRecord, ConsolidationMethod,
    ProcessingMetadata, RadarData, SourceFormat, VehicleDetection, WeatherSample, WeatherSnapshot,
};

#[derive(Debug, Error)]
pub enum CorrelatorError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Bus(#[from] BusError),
}

#[derive(Default)]
pub struct CorrelatorCounters {
    pub messages_processed: AtomicU64,
    pub messages_dropped_invalid: AtomicU64,
    pub groups_created: AtomicU64,
    pub groups_extended: AtomicU64,
    pub camera_correlated: AtomicU64,
    pub camera_fallback: AtomicU64,
    pub publish_failures: AtomicU64,
}

pub struct Correlator {
    bus: Arc<dyn EventBus>,
    camera_ring: Arc<CameraRing>,
    counters: Arc<CorrelatorCounters>,
    groups: GroupTable,
    hourly: HourlyAccumulator,
    consumer_name: String,
}

impl Correlator {
    pub fn new(bus: Arc<dyn EventBus>, camera_ring: Arc<CameraRing>) -> Self {
        Self {
            bus,
            camera_ring,
            counters: Arc::new(CorrelatorCounters::default()),
            groups: GroupTable::new(),
            hourly: HourlyAccumulator::default(),
            consumer_name: format!("consolidator-{}", random_hex_id()),
        }
    }

    pub fn counters(&self) -> Arc<CorrelatorCounters> {
        self.counters.clone()
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        if let Err(e) = self.bus.ensure_group(STREAM_RADAR, GROUP_CONSOLIDATOR).await {
            tracing::error!(error = %e, "correlator failed to ensure consumer group, exiting");
            return;
        }

        let mut last_sweep = Instant::now();
        let sweep_interval = Duration::from_secs(GROUP_SWEEP_INTERVAL_SECS);

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let batch = tokio::select! {
                result = self.bus.consume_group(
                    STREAM_RADAR,
                    GROUP_CONSOLIDATOR,
                    &self.consumer_name,
                    CORRELATOR_BATCH_SIZE,
                    Duration::from_secs(STREAM_CONSUME_BLOCK_SECS),
                ) => result,
                _ = cancel.cancelled() => return,
            };

            match batch {
                Ok(entries) => {
                    for entry in entries {
                        self.process_entry(entry).await;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "correlator failed to read radar stream");
                }
            }

            if last_sweep.elapsed() >= sweep_interval {
                let evicted = self.groups.sweep(Utc::now());
                if evicted > 0 {
                    tracing::debug!(evicted, "swept stale vehicle groups");
                }
                last_sweep = Instant::now();
            }
        }
    }

    async fn process_entry(&mut self, entry: StreamEntry) {
        let detection = match decode_detection(&entry.fields) {
            Ok(d) => d,
            Err(e) => {
                self.counters
                    .messages_dropped_invalid
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, message_id = %entry.id, "dropped unparseable radar message");
                self.ack(&entry.id).await;
                return;
            }
        };

        self.counters.messages_processed.fetch_add(1, Ordering::Relaxed);

        match self.groups.apply(detection) {
            GroupOutcome::Extended(_) => {
                self.counters.groups_extended.fetch_add(1, Ordering::Relaxed);
                self.ack(&entry.id).await;
                return;
            }
            GroupOutcome::Created(group_id) => {
                self.counters.groups_created.fetch_add(1, Ordering::Relaxed);
                self.emit(&group_id, &entry.id).await;
            }
        }
    }

    async fn emit(&mut self, group_id: &str, message_id: &str) {
        let Some(group) = self.groups.get(group_id) else {
            return; // evicted between apply() and here; nothing to emit
        };
        let detection = group.first_detection().clone();

        let camera_data = self.correlate_camera(&detection);
        let weather_data = self.attach_weather().await;

        let direction = detection.direction();
        let sources_used = sources_used(&camera_data);
        let consolidation_method = if camera_data.fallback_reason.is_none() {
            ConsolidationMethod::RadarCameraCorrelated
        } else {
            ConsolidationMethod::RadarOnly
        };
        let record = ConsolidatedRecord {
            consolidation_id: random_hex_id(),
            correlation_id: detection.correlation_id.clone(),
            timestamp: detection.timestamp,
            trigger_source: "radar",
            radar_data: RadarData {
                detection_id: detection.detection_id.clone(),
                speed_mph: detection.speed_mph,
                speed_mps: detection.speed_mps,
                alert_level: detection.alert_level,
                direction,
                source_format: detection.source_format,
            },
            weather_data,
            camera_data,
            processing_metadata: ProcessingMetadata {
                sources_used,
                consolidation_method,
            },
        };

        let published = self.publish(&record).await;
        if published {
            self.ack(message_id).await;
            self.roll_hourly(&detection).await;
            self.record_business_event(&record).await;
        } else {
            self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
            // Do not ack: redelivery will retry the whole entry.
        }
    }

    fn correlate_camera(&self, detection: &VehicleDetection) -> CameraData {
        let snapshot = self.camera_ring.newest_first();
        let best = snapshot
            .iter()
            .filter(|c| c.vehicle_count > 0)
            .map(|c| (c, (detection.timestamp - c.timestamp).num_milliseconds().abs()))
            .filter(|(_, diff_ms)| *diff_ms <= CAMERA_WINDOW_SECS * 1000)
            .min_by_key(|(_, diff_ms)| *diff_ms);

        match best {
            Some((camera, diff_ms)) => {
                self.counters.camera_correlated.fetch_add(1, Ordering::Relaxed);
                CameraData {
                    vehicle_count: camera.vehicle_count,
                    vehicle_types: camera.vehicle_types.clone(),
                    primary_confidence: Some(camera.primary_confidence),
                    image_id: Some(camera.image_id.clone()),
                    image_path: Some(camera.image_path.clone()),
                    correlation_time_diff: Some(diff_ms as f64 / 1000.0),
                    fallback_reason: None,
                }
            }
            None => {
                self.counters.camera_fallback.fetch_add(1, Ordering::Relaxed);
                CameraData::fallback()
            }
        }
    }

    async fn attach_weather(&self) -> WeatherSnapshot {
        let local = self.fetch_weather(KEY_WEATHER_LOCAL).await;
        let airport = self.fetch_weather(KEY_WEATHER_AIRPORT).await;
        WeatherSnapshot { local, airport }
    }

    async fn fetch_weather(&self, key: &str) -> Option<WeatherSample> {
        match self.bus.get_latest(key).await {
            Ok(Some(json)) => serde_json::from_str(&json).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, key, "failed to read latest weather value");
                None
            }
        }
    }

    async fn publish(&self, record: &ConsolidatedRecord) -> bool {
        let json = match serde_json::to_string(record) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize consolidated record");
                return false;
            }
        };

        let mut fields = Fields::new();
        fields.insert("data".to_string(), json.clone());
        fields.insert("correlation_id".to_string(), record.correlation_id.clone());
        fields.insert("timestamp".to_string(), record.timestamp.to_rfc3339());

        if let Err(e) = self.bus.publish_stream(STREAM_CONSOLIDATED, fields).await {
            tracing::error!(error = %e, consolidation_id = %record.consolidation_id, "failed to publish consolidated record");
            return false;
        }

        if let Err(e) = self
            .bus
            .publish_pubsub(CHANNEL_CONSOLIDATED_QUEUED, &json)
            .await
        {
            tracing::warn!(error = %e, "failed to publish consolidated_data_queued notification");
        }

        true
    }

    async fn roll_hourly(&mut self, detection: &VehicleDetection) {
        if let Some(closed) = self.hourly.record(detection, Utc::now()) {
            if let Ok(json) = serde_json::to_string(&closed) {
                if let Err(e) = self
                    .bus
                    .push_bounded_list(KEY_HOURLY_SUMMARY, &json, HOURLY_SUMMARY_HISTORY)
                    .await
                {
                    tracing::warn!(error = %e, "failed to push hourly summary");
                }
            }
        }
    }

    pub fn hourly_snapshot(&self) -> HourlyStats {
        self.hourly.snapshot()
    }

    /// High-alert records are noteworthy enough to tail independently of the
    /// full SQLite-backed history.
    async fn record_business_event(&self, record: &ConsolidatedRecord) {
        if record.radar_data.alert_level != AlertLevel::High {
            return;
        }
        if let Ok(json) = serde_json::to_string(record) {
            if let Err(e) = self
                .bus
                .push_bounded_list(KEY_BUSINESS_EVENTS, &json, BUSINESS_EVENTS_HISTORY)
                .await
            {
                tracing::warn!(error = %e, "failed to push business event");
            }
        }
    }

    async fn ack(&self, message_id: &str) {
        if let Err(e) = self.bus.ack(STREAM_RADAR, GROUP_CONSOLIDATOR, message_id).await {
            tracing::error!(error = %e, message_id, "failed to ack radar message");
        }
    }
}

fn sources_used(camera_data: &CameraData) -> Vec<&'static str> {
    if camera_data.fallback_reason.is_none() {
        vec!["radar", "camera"]
    } else {
        vec!["radar"]
    }
}

fn decode_detection(fields: &Fields) -> Result<VehicleDetection, CorrelatorError> {
    let get = |key: &str| -> Result<String, CorrelatorError> {
        fields
            .get(key)
            .cloned()
            .ok_or_else(|| CorrelatorError::Decode(format!("missing field {key}")))
    };
    let parse_f64 = |key: &str| -> Result<f64, CorrelatorError> {
        get(key)?
            .parse::<f64>()
            .map_err(|e| CorrelatorError::Decode(format!("bad {key}: {e}")))
    };

    let speed_mph = parse_f64("speed")?;
    let speed_mps = parse_f64("speed_mps")?;
    let alert_level = alert_level_from_str(&get("alert_level")?)?;
    let source_format = source_format_from_str(&get("_format")?)?;
    let timestamp = get("_timestamp")?
        .parse()
        .map_err(|e| CorrelatorError::Decode(format!("bad _timestamp: {e}")))?;

    Ok(VehicleDetection {
        detection_id: get("detection_id")?,
        correlation_id: get("correlation_id")?,
        timestamp,
        speed_mph,
        speed_mps,
        alert_level,
        source_format,
        magnitude: get("magnitude").unwrap_or_default(),
        unit: get("unit").unwrap_or_default(),
        raw: get("_raw").unwrap_or_default(),
    })
}

fn alert_level_from_str(s: &str) -> Result<AlertLevel, CorrelatorError> {
    match s {
        "noise" => Ok(AlertLevel::Noise),
        "normal" => Ok(AlertLevel::Normal),
        "low" => Ok(AlertLevel::Low),
        "high" => Ok(AlertLevel::High),
        other => Err(CorrelatorError::Decode(format!("unknown alert_level {other}"))),
    }
}

fn source_format_from_str(s: &str) -> Result<SourceFormat, CorrelatorError> {
    match s {
        "csv" => Ok(SourceFormat::Csv),
        "json" => Ok(SourceFormat::Json),
        "bare" => Ok(SourceFormat::Bare),
        "space_separated" => Ok(SourceFormat::SpaceSeparated),
        "comma_separated" => Ok(SourceFormat::CommaSeparated),
        other => Err(CorrelatorError::Decode(format!("unknown format {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use std::time::Duration as StdDuration;

    fn radar_fields(speed: f64, format: &str) -> Fields {
        let mut f = Fields::new();
        f.insert("speed".to_string(), speed.to_string());
        f.insert("speed_mps".to_string(), (speed / 2.237).to_string());
        f.insert("magnitude".to_string(), "m".to_string());
        f.insert("unit".to_string(), "mph".to_string());
        f.insert(
            "alert_level".to_string(),
            if speed.abs() >= 26.0 { "high" } else { "low" }.to_string(),
        );
        f.insert("detection_id".to_string(), random_hex_id());
        f.insert("correlation_id".to_string(), random_hex_id());
        f.insert("_timestamp".to_string(), Utc::now().to_rfc3339());
        f.insert("_raw".to_string(), format!("\"m\",{speed}"));
        f.insert("_source".to_string(), "radar".to_string());
        f.insert("_format".to_string(), format.to_string());
        f
    }

    #[tokio::test]
    async fn first_detection_emits_consolidated_record() {
        if !config::is_initialized() {
            config::init(config::Config::for_tests());
        }
        let bus = Arc::new(InMemoryBus::new());
        bus.ensure_group(STREAM_RADAR, GROUP_CONSOLIDATOR).await.unwrap();
        bus.publish_stream(STREAM_RADAR, radar_fields(30.0, "csv")).await.unwrap();

        let ring = Arc::new(CameraRing::new(10));
        let mut correlator = Correlator::new(bus.clone(), ring);

        let entries = bus
            .consume_group(STREAM_RADAR, GROUP_CONSOLIDATOR, "c1", 10, StdDuration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        correlator.process_entry(entries[0].clone()).await;

        let consolidated = bus
            .consume_group(STREAM_CONSOLIDATED, "verify-group", "v1", 10, StdDuration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(consolidated.len(), 1);
        assert_eq!(
            correlator.counters.groups_created.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn duplicate_detection_does_not_emit_twice() {
        if !config::is_initialized() {
            config::init(config::Config::for_tests());
        }
        let bus = Arc::new(InMemoryBus::new());
        bus.ensure_group(STREAM_RADAR, GROUP_CONSOLIDATOR).await.unwrap();
        bus.publish_stream(STREAM_RADAR, radar_fields(30.0, "csv")).await.unwrap();
        bus.publish_stream(STREAM_RADAR, radar_fields(29.0, "csv")).await.unwrap();

        let ring = Arc::new(CameraRing::new(10));
        let mut correlator = Correlator::new(bus.clone(), ring);

        let entries = bus
            .consume_group(STREAM_RADAR, GROUP_CONSOLIDATOR, "c1", 10, StdDuration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        for entry in entries {
            correlator.process_entry(entry).await;
        }

        let consolidated = bus
            .consume_group(STREAM_CONSOLIDATED, "verify-group", "v1", 10, StdDuration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(consolidated.len(), 1);
        assert_eq!(
            correlator.counters.groups_extended.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn malformed_entry_is_dropped_and_acked() {
        if !config::is_initialized() {
            config::init(config::Config::for_tests());
        }
        let bus = Arc::new(InMemoryBus::new());
        bus.ensure_group(STREAM_RADAR, GROUP_CONSOLIDATOR).await.unwrap();
        let mut bad_fields = Fields::new();
        bad_fields.insert("speed".to_string(), "not-a-number".to_string());
        bus.publish_stream(STREAM_RADAR, bad_fields).await.unwrap();

        let ring = Arc::new(CameraRing::new(10));
        let mut correlator = Correlator::new(bus.clone(), ring);

        let entries = bus
            .consume_group(STREAM_RADAR, GROUP_CONSOLIDATOR, "c1", 10, StdDuration::from_millis(1))
            .await
            .unwrap();
        correlator.process_entry(entries[0].clone()).await;

        assert_eq!(
            correlator
                .counters
                .messages_dropped_invalid
                .load(Ordering::Relaxed),
            1
        );
        // Acked: a second consume sees nothing pending.
        let redelivered = bus
            .consume_group(STREAM_RADAR, GROUP_CONSOLIDATOR, "c2", 10, StdDuration::from_millis(1))
            .await
            .unwrap();
        assert!(redelivered.is_empty());
    }
}
