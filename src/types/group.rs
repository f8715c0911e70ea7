//! In-memory duplicate-vehicle grouping state, owned exclusively by the
//! Correlator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::VehicleDetection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedTrend {
    Initial,
    Increasing,
    Decreasing,
    Steady,
}

/// A run of radar detections believed to be the same physical vehicle.
/// Created on a detection that doesn't match any existing group; extended
/// (never re-emitted) by subsequent matching detections.
#[derive(Debug, Clone)]
pub struct VehicleGroup {
    pub group_id: String,
    pub first_timestamp: DateTime<Utc>,
    pub latest_timestamp: DateTime<Utc>,
    pub detections: Vec<VehicleDetection>,
    pub latest_speed_mph: f64,
    pub latest_speed_mps: f64,
    pub speed_trend: SpeedTrend,
}

impl VehicleGroup {
    pub fn new(group_id: String, detection: VehicleDetection) -> Self {
        let ts = detection.timestamp;
        let speed_mph = detection.speed_mph;
        let speed_mps = detection.speed_mps;
        Self {
            group_id,
            first_timestamp: ts,
            latest_timestamp: ts,
            detections: vec![detection],
            latest_speed_mph: speed_mph,
            latest_speed_mps: speed_mps,
            speed_trend: SpeedTrend::Initial,
        }
    }

    pub fn first_detection(&self) -> &VehicleDetection {
        // `detections` is never empty: `new` seeds it and `extend` only pushes.
        &self.detections[0]
    }

    pub fn detection_count(&self) -> usize {
        self.detections.len()
    }

    /// Append a matching detection, refresh `latest_*`, and recompute
    /// `speed_trend` from first-vs-last absolute speed (ties -> steady).
    pub fn extend(&mut self, detection: VehicleDetection) {
        self.latest_timestamp = detection.timestamp;
        self.latest_speed_mph = detection.speed_mph;
        self.latest_speed_mps = detection.speed_mps;

        let first_abs = self.first_detection().speed_mph.abs();
        let last_abs = detection.speed_mph.abs();
        self.speed_trend = if (last_abs - first_abs).abs() < f64::EPSILON {
            SpeedTrend::Steady
        } else if last_abs > first_abs {
            SpeedTrend::Increasing
        } else {
            SpeedTrend::Decreasing
        };

        self.detections.push(detection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertLevel, SourceFormat};

    fn detection(speed_mph: f64, ts: DateTime<Utc>) -> VehicleDetection {
        VehicleDetection {
            detection_id: crate::types::random_hex_id(),
            correlation_id: "seed".into(),
            timestamp: ts,
            speed_mph,
            speed_mps: speed_mph * 0.44704,
            alert_level: AlertLevel::High,
            source_format: SourceFormat::Csv,
            magnitude: "m".into(),
            unit: "mph".into(),
            raw: String::new(),
        }
    }

    #[test]
    fn trend_decreasing_on_two_samples() {
        let t0 = Utc::now();
        let mut group = VehicleGroup::new("g1".into(), detection(30.0, t0));
        group.extend(detection(28.5, t0 + chrono::Duration::milliseconds(1200)));
        assert_eq!(group.speed_trend, SpeedTrend::Decreasing);
        assert_eq!(group.detection_count(), 2);
    }

    #[test]
    fn trend_steady_on_tie() {
        let t0 = Utc::now();
        let mut group = VehicleGroup::new("g1".into(), detection(30.0, t0));
        group.extend(detection(-30.0, t0));
        assert_eq!(group.speed_trend, SpeedTrend::Steady);
    }
}
