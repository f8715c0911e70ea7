//! Camera Ingestor: subscribes to the camera's pub/sub channel,
//! normalizes each message, and feeds the shared ring the Correlator reads
//! from. Owns no camera hardware and persists nothing itself.

mod ring;

pub use ring::CameraRing;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::config::CHANNEL_CAMERA_DETECTIONS;
use crate::types::CameraDetection;

#[derive(Deserialize)]
struct RawCameraMessage {
    image_id: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    ai_results: RawAiResults,
    image_path: String,
}

#[derive(Deserialize)]
struct RawAiResults {
    detection_count: u32,
    detections: Vec<RawDetection>,
}

#[derive(Deserialize)]
struct RawDetection {
    class_name: String,
    confidence: f64,
}

#[derive(Default)]
pub struct CameraCounters {
    pub messages_received: AtomicU64,
    pub messages_dropped: AtomicU64,
}

pub struct CameraIngestor {
    bus: Arc<dyn EventBus>,
    ring: Arc<CameraRing>,
    counters: Arc<CameraCounters>,
}

impl CameraIngestor {
    pub fn new(bus: Arc<dyn EventBus>, ring: Arc<CameraRing>) -> Self {
        Self {
            bus,
            ring,
            counters: Arc::new(CameraCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<CameraCounters> {
        self.counters.clone()
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut rx = match self.bus.subscribe_pubsub(CHANNEL_CAMERA_DETECTIONS).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(error = %e, "camera ingestor failed to subscribe");
                return;
            }
        };

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(payload) => self.handle_message(&payload),
                    None => return,
                },
                _ = cancel.cancelled() => return,
            }
        }
    }

    fn handle_message(&self, payload: &str) {
        self.counters.messages_received.fetch_add(1, Ordering::Relaxed);

        let raw: RawCameraMessage = match serde_json::from_str(payload) {
            Ok(r) => r,
            Err(e) => {
                self.counters.messages_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %e, "dropped malformed camera message");
                return;
            }
        };

        let vehicle_types: Vec<String> = raw
            .ai_results
            .detections
            .iter()
            .map(|d| d.class_name.clone())
            .collect();
        let primary_confidence = raw
            .ai_results
            .detections
            .iter()
            .map(|d| d.confidence)
            .fold(0.0_f64, f64::max);

        self.ring.push(CameraDetection {
            image_id: raw.image_id,
            timestamp: raw.timestamp,
            vehicle_count: raw.ai_results.detection_count,
            vehicle_types,
            primary_confidence,
            image_path: raw.image_path,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;

    #[test]
    fn normalizes_and_pushes_into_ring() {
        let bus = Arc::new(InMemoryBus::new());
        let ring = Arc::new(CameraRing::new(10));
        let ingestor = CameraIngestor::new(bus, ring.clone());

        let payload = serde_json::json!({
            "image_id": "IMG1",
            "timestamp": "2026-01-01T00:00:00Z",
            "ai_results": {
                "detection_count": 2,
                "detections": [
                    {"class_name": "car", "confidence": 0.92},
                    {"class_name": "truck", "confidence": 0.81},
                ],
            },
            "image_path": "/images/IMG1.jpg",
        })
        .to_string();

        ingestor.handle_message(&payload);
        let snapshot = ring.newest_first();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].vehicle_count, 2);
        assert_eq!(snapshot[0].vehicle_types, vec!["car", "truck"]);
        assert!((snapshot[0].primary_confidence - 0.92).abs() < 1e-9);
    }

    #[test]
    fn malformed_message_is_dropped() {
        let bus = Arc::new(InMemoryBus::new());
        let ring = Arc::new(CameraRing::new(10));
        let ingestor = CameraIngestor::new(bus, ring.clone());
        ingestor.handle_message("not json");
        assert_eq!(ring.newest_first().len(), 0);
        assert_eq!(
            ingestor.counters.messages_dropped.load(Ordering::Relaxed),
            1
        );
    }
}
