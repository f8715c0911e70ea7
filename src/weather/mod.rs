//! Weather Ingestor: periodic DHT22 reads, range validation, and
//! storage of the latest sample plus a trimmed time series.

mod dht22;

pub use dht22::{read_blocking, Dht22Error, RawReading};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::config::{self, KEY_WEATHER_LOCAL, WEATHER_SERIES_RETENTION_HOURS};
use crate::types::{WeatherSample, WeatherSource};

#[derive(Default)]
pub struct WeatherCounters {
    pub reads_attempted: AtomicU64,
    pub reads_succeeded: AtomicU64,
    pub reads_failed: AtomicU64,
}

pub struct WeatherIngestor {
    bus: Arc<dyn EventBus>,
    counters: Arc<WeatherCounters>,
    gpio_pin: u32,
}

impl WeatherIngestor {
    pub fn new(bus: Arc<dyn EventBus>, gpio_pin: u32) -> Self {
        Self {
            bus,
            counters: Arc::new(WeatherCounters::default()),
            gpio_pin,
        }
    }

    pub fn counters(&self) -> Arc<WeatherCounters> {
        self.counters.clone()
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let interval = Duration::from_secs(config::get().weather.update_interval_secs);
        loop {
            self.read_once().await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return,
            }
        }
    }

    async fn read_once(&self) {
        self.counters.reads_attempted.fetch_add(1, Ordering::Relaxed);

        let pin = self.gpio_pin;
        let raw = match tokio::task::spawn_blocking(move || read_blocking(pin)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                self.counters.reads_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "dht22 read failed");
                return;
            }
            Err(e) => {
                self.counters.reads_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "dht22 read task panicked");
                return;
            }
        };

        let sample = match WeatherSample::new(
            Utc::now(),
            raw.temperature_c,
            raw.humidity_pct,
            WeatherSource::Local,
        ) {
            Ok(sample) => sample,
            Err(e) => {
                self.counters.reads_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "dht22 reading out of range, discarded");
                return;
            }
        };

        self.counters.reads_succeeded.fetch_add(1, Ordering::Relaxed);
        self.store(&sample).await;
    }

    async fn store(&self, sample: &WeatherSample) {
        let json = match serde_json::to_string(sample) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize weather sample");
                return;
            }
        };

        if let Err(e) = self.bus.set_latest(KEY_WEATHER_LOCAL, &json, None).await {
            tracing::error!(error = %e, "failed to store latest weather sample");
        }

        let series_key = format!("{KEY_WEATHER_LOCAL}:series");
        let samples_per_window =
            (WEATHER_SERIES_RETENTION_HOURS as u64 * 3600 / config::get().weather.update_interval_secs.max(1))
                .max(1) as usize;
        if let Err(e) = self
            .bus
            .push_bounded_list(&series_key, &json, samples_per_window)
            .await
        {
            tracing::error!(error = %e, "failed to append weather time series entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;

    #[tokio::test]
    async fn stores_valid_sample() {
        if !config::is_initialized() {
            config::init(config::Config::for_tests());
        }
        let bus = Arc::new(InMemoryBus::new());
        let ingestor = WeatherIngestor::new(bus.clone(), 4);
        let sample = WeatherSample::new(Utc::now(), 20.0, 45.0, WeatherSource::Local).unwrap();
        ingestor.store(&sample).await;

        let stored = bus.get_latest(KEY_WEATHER_LOCAL).await.unwrap();
        assert!(stored.is_some());
    }
}
