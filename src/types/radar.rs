//! Radar readings and the vehicle detections derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which line format the radar parser matched, in priority order. Carried
/// through to `VehicleDetection` for diagnostics and per-format counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Csv,
    Json,
    Bare,
    SpaceSeparated,
    CommaSeparated,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Json => "json",
            SourceFormat::Bare => "bare",
            SourceFormat::SpaceSeparated => "space_separated",
            SourceFormat::CommaSeparated => "comma_separated",
        }
    }
}

/// Alert classification assigned once a reading clears the noise floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Noise,
    Normal,
    Low,
    High,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Noise => "noise",
            AlertLevel::Normal => "normal",
            AlertLevel::Low => "low",
            AlertLevel::High => "high",
        }
    }
}

/// A radar detection that cleared the noise threshold and was published to
/// `traffic:radar`. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleDetection {
    pub detection_id: String,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub speed_mph: f64,
    pub speed_mps: f64,
    pub alert_level: AlertLevel,
    pub source_format: SourceFormat,
    pub magnitude: String,
    pub unit: String,
    pub raw: String,
}

impl VehicleDetection {
    /// `"approaching"` for negative speed, `"receding"` otherwise. Sign is
    /// preserved end to end; zero is not a valid emitted speed (the noise
    /// floor is always > 0), so there is no ambiguous case in practice.
    pub fn direction(&self) -> &'static str {
        if self.speed_mph < 0.0 {
            "approaching"
        } else {
            "receding"
        }
    }
}
