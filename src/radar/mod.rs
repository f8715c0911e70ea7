//! Radar Ingestor: serial framing, parsing, noise filtering, alert
//! classification, and publication to the bus.

mod parser;
mod serial;

pub use parser::{parse_line, ParsedLine};
pub use serial::{RadarPort, RadarSerialError};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, Fields};
use crate::config::{
    self, CHANNEL_TRAFFIC_EVENTS, HIGH_THRESHOLD_MPH, LOW_THRESHOLD_MPH, MPS_TO_MPH,
    NOISE_THRESHOLD_MPH, STREAM_RADAR,
};
use crate::types::{random_hex_id, AlertLevel};

/// Counters the Radar Ingestor exposes to the Query Surface's `health()`.
#[derive(Default)]
pub struct RadarCounters {
    pub lines_read: AtomicU64,
    pub lines_unparseable: AtomicU64,
    pub noise_filtered: AtomicU64,
    pub detections_published: AtomicU64,
    pub serial_errors: AtomicU64,
}

pub struct RadarIngestor {
    bus: Arc<dyn EventBus>,
    counters: Arc<RadarCounters>,
}

impl RadarIngestor {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            counters: Arc::new(RadarCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<RadarCounters> {
        self.counters.clone()
    }

    /// Run the ingestion loop until `cancel` fires. Serial I/O errors
    /// restart the read (after a 1s pause) without ending the worker.
    pub async fn run(&self, cancel: CancellationToken) {
        let cfg = config::get();
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let mut port = match RadarPort::open(&cfg.radar.uart_port, cfg.radar.baud_rate).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "radar serial open failed, retrying in 1s");
                    self.counters.serial_errors.fetch_add(1, Ordering::Relaxed);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                        _ = cancel.cancelled() => return,
                    }
                }
            };

            loop {
                if cancel.is_cancelled() {
                    return;
                }
                let line = tokio::select! {
                    result = port.read_line() => result,
                    _ = cancel.cancelled() => return,
                };

                match line {
                    Ok(line) => self.handle_line(&line).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "radar serial read error, reopening port");
                        self.counters.serial_errors.fetch_add(1, Ordering::Relaxed);
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(1)) => break,
                            _ = cancel.cancelled() => return,
                        }
                    }
                }
            }
        }
    }

    async fn handle_line(&self, line: &str) {
        self.counters.lines_read.fetch_add(1, Ordering::Relaxed);

        let Some(parsed) = parse_line(line) else {
            self.counters.lines_unparseable.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(line, "unparseable radar line, dropped");
            return;
        };

        let speed_mph = parsed.speed_mph;
        let speed_mps = speed_mph / MPS_TO_MPH;

        if speed_mph.abs() < NOISE_THRESHOLD_MPH {
            self.counters.noise_filtered.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let alert_level = classify_alert(speed_mph.abs());
        let detection_id = random_hex_id();
        let correlation_id = detection_id.clone();
        let now = Utc::now();

        let mut fields = Fields::new();
        fields.insert("speed".to_string(), speed_mph.to_string());
        fields.insert("speed_mps".to_string(), speed_mps.to_string());
        fields.insert("magnitude".to_string(), parsed.magnitude.clone());
        fields.insert("unit".to_string(), parsed.unit.clone());
        fields.insert("alert_level".to_string(), alert_level.as_str().to_string());
        fields.insert("detection_id".to_string(), detection_id.clone());
        fields.insert("correlation_id".to_string(), correlation_id.clone());
        fields.insert("_timestamp".to_string(), now.to_rfc3339());
        fields.insert("_raw".to_string(), line.to_string());
        fields.insert("_source".to_string(), "radar".to_string());
        fields.insert("_format".to_string(), parsed.format.as_str().to_string());

        match self.bus.publish_stream(STREAM_RADAR, fields).await {
            Ok(_id) => {
                self.counters
                    .detections_published
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(error = %e, detection_id, "failed to publish radar detection");
                return;
            }
        }

        let event = serde_json::json!({
            "event_type": "vehicle_detection",
            "detection_id": detection_id,
            "speed_mph": speed_mph,
            "alert_level": alert_level.as_str(),
            "correlation_id": correlation_id,
            "timestamp": now.to_rfc3339(),
        });
        if let Err(e) = self
            .bus
            .publish_pubsub(CHANNEL_TRAFFIC_EVENTS, &event.to_string())
            .await
        {
            tracing::warn!(error = %e, "failed to publish traffic_events notification");
        }
    }
}

fn classify_alert(abs_speed_mph: f64) -> AlertLevel {
    if abs_speed_mph >= HIGH_THRESHOLD_MPH {
        AlertLevel::High
    } else if abs_speed_mph >= LOW_THRESHOLD_MPH {
        AlertLevel::Low
    } else {
        AlertLevel::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;

    fn ingestor() -> RadarIngestor {
        if !config::is_initialized() {
            config::init(config::Config::for_tests());
        }
        RadarIngestor::new(Arc::new(InMemoryBus::new()))
    }

    #[tokio::test]
    async fn noise_is_filtered_and_not_published() {
        let ing = ingestor();
        ing.handle_line(r#""m",1.5"#).await;
        assert_eq!(ing.counters.noise_filtered.load(Ordering::Relaxed), 1);
        assert_eq!(ing.counters.detections_published.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn boundary_noise_threshold_is_emitted() {
        let ing = ingestor();
        ing.handle_line(r#""m",2.0"#).await;
        assert_eq!(ing.counters.detections_published.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn boundary_high_threshold_is_classified_high() {
        assert_eq!(classify_alert(26.0), AlertLevel::High);
        assert_eq!(classify_alert(25.999), AlertLevel::Low);
    }

    #[tokio::test]
    async fn garbage_line_is_dropped_without_panic() {
        let ing = ingestor();
        ing.handle_line("garbage").await;
        assert_eq!(ing.counters.lines_unparseable.load(Ordering::Relaxed), 1);
    }
}
