//! Weather samples, local (DHT22) or external (airport API).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherSource {
    Local,
    External,
}

impl WeatherSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeatherSource::Local => "local",
            WeatherSource::External => "external",
        }
    }
}

/// A single validated weather reading. Range-checked before construction:
/// callers never see an out-of-range sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherSample {
    pub timestamp: DateTime<Utc>,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub source: WeatherSource,
}

impl WeatherSample {
    pub const MIN_TEMP_C: f64 = -40.0;
    pub const MAX_TEMP_C: f64 = 80.0;
    pub const MIN_HUMIDITY_PCT: f64 = 0.0;
    pub const MAX_HUMIDITY_PCT: f64 = 100.0;

    /// Construct a sample, rejecting out-of-range values. This is the only
    /// constructor; every `WeatherSample` in the system has already passed
    /// this check.
    pub fn new(
        timestamp: DateTime<Utc>,
        temperature_c: f64,
        humidity_pct: f64,
        source: WeatherSource,
    ) -> Result<Self, WeatherRangeError> {
        if !(Self::MIN_TEMP_C..=Self::MAX_TEMP_C).contains(&temperature_c) {
            return Err(WeatherRangeError::Temperature(temperature_c));
        }
        if !(Self::MIN_HUMIDITY_PCT..=Self::MAX_HUMIDITY_PCT).contains(&humidity_pct) {
            return Err(WeatherRangeError::Humidity(humidity_pct));
        }
        Ok(Self {
            timestamp,
            temperature_c,
            humidity_pct,
            source,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WeatherRangeError {
    #[error("temperature {0} C out of range [-40, 80]")]
    Temperature(f64),
    #[error("humidity {0}% out of range [0, 100]")]
    Humidity(f64),
}
