//! The consolidated record: the join of a triggering radar detection with
//! the closest contemporaneous camera and weather data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AlertLevel, SourceFormat};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadarData {
    pub detection_id: String,
    pub speed_mph: f64,
    pub speed_mps: f64,
    pub alert_level: AlertLevel,
    pub direction: &'static str,
    pub source_format: SourceFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WeatherSnapshot {
    pub local: Option<super::WeatherSample>,
    pub airport: Option<super::WeatherSample>,
}

impl WeatherSnapshot {
    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.airport.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationMethod {
    RadarCameraCorrelated,
    RadarOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraData {
    pub vehicle_count: u32,
    pub vehicle_types: Vec<String>,
    pub primary_confidence: Option<f64>,
    pub image_id: Option<String>,
    pub image_path: Option<String>,
    /// Absolute seconds between the radar detection and the matched camera
    /// event; `None` on fallback.
    pub correlation_time_diff: Option<f64>,
    pub fallback_reason: Option<String>,
}

impl CameraData {
    pub fn fallback() -> Self {
        Self {
            vehicle_count: 1,
            vehicle_types: Vec::new(),
            primary_confidence: None,
            image_id: None,
            image_path: None,
            correlation_time_diff: None,
            fallback_reason: Some("no_camera_correlation".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub sources_used: Vec<&'static str>,
    pub consolidation_method: ConsolidationMethod,
}

/// Immutable once emitted. Created by the Correlator, owned by the bus
/// stream, consumed independently by the Persister and the Broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedRecord {
    pub consolidation_id: String,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub trigger_source: &'static str,
    pub radar_data: RadarData,
    pub weather_data: WeatherSnapshot,
    pub camera_data: CameraData,
    pub processing_metadata: ProcessingMetadata,
}
