//! Environment-variable-driven configuration record.

use std::path::PathBuf;

use super::defaults::*;

/// Fatal at startup only. Maps to exit code 2.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct RadarConfig {
    pub uart_port: String,
    pub baud_rate: u32,
    pub noise_threshold_mph: f64,
    pub low_threshold_mph: f64,
    pub high_threshold_mph: f64,
}

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub gpio_pin: u32,
    pub update_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub retention_days: i64,
}

/// Immutable process-wide configuration, built once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis: RedisConfig,
    pub storage: StorageConfig,
    pub radar: RadarConfig,
    pub weather: WeatherConfig,
    pub api: ApiConfig,
    pub log_level: String,
    /// Fatal-on-invalid-env mode. Tests and local dev runs relax this.
    pub production: bool,
}

impl Config {
    /// Build the configuration from the process environment, applying the
    /// minimum recognized set of defaults. `production` controls whether invalid values
    /// are a hard `ConfigError` (true) or fall back to defaults with a
    /// warning (false, used by tests and `--dev` runs).
    pub fn from_env(production: bool) -> Result<Self, ConfigError> {
        let redis = RedisConfig {
            host: env_string("REDIS_HOST", "127.0.0.1"),
            port: env_parsed("REDIS_PORT", 6379, production)?,
        };

        let storage = StorageConfig {
            database_path: PathBuf::from(env_string("DATABASE_PATH", "traffic.db")),
            retention_days: env_parsed("RETENTION_DAYS", DEFAULT_RETENTION_DAYS, production)?,
        };

        let radar = RadarConfig {
            uart_port: env_string("RADAR_UART_PORT", "/dev/ttyACM0"),
            baud_rate: env_parsed("RADAR_BAUD_RATE", 19200, production)?,
            noise_threshold_mph: NOISE_THRESHOLD_MPH,
            low_threshold_mph: LOW_THRESHOLD_MPH,
            high_threshold_mph: HIGH_THRESHOLD_MPH,
        };

        let weather = WeatherConfig {
            gpio_pin: env_parsed("DHT22_GPIO_PIN", 4, production)?,
            update_interval_secs: env_parsed(
                "DHT22_UPDATE_INTERVAL",
                DEFAULT_WEATHER_INTERVAL_SECS,
                production,
            )?,
        };

        let api = ApiConfig {
            host: env_string("API_HOST", "0.0.0.0"),
            port: env_parsed("API_PORT", 8080, production)?,
        };

        let log_level = env_string("LOG_LEVEL", "info");

        Ok(Self {
            redis,
            storage,
            radar,
            weather,
            api,
            log_level,
            production,
        })
    }

    /// A configuration suitable for tests: no env lookups, all defaults.
    pub fn for_tests() -> Self {
        Self::from_env(false).expect("defaults always parse")
    }
}

fn env_string(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

/// Parse an env var, falling back to `default` if unset. If set but
/// unparsable: fatal in production mode, warn-and-fallback otherwise.
fn env_parsed<T>(var: &'static str, default: T, production: bool) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Clone,
{
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) if production => Err(ConfigError::InvalidValue {
                var,
                value: raw,
                reason: "failed to parse",
            }),
            Err(_) => {
                tracing::warn!(var, value = %raw, "invalid env value, using default");
                Ok(default)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_without_env() {
        let cfg = Config::for_tests();
        assert_eq!(cfg.redis.port, 6379);
        assert_eq!(cfg.storage.retention_days, DEFAULT_RETENTION_DAYS);
        assert_eq!(cfg.radar.baud_rate, 19200);
    }
}
