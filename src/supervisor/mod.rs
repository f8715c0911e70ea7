//! Builds every component and runs one lightweight worker per component
//! under a shared cancellation token, via a `JoinSet<(WorkerName, ())>`:
//! each worker's cancel-token clone is checked on its own suspension
//! points, and the first worker failure cancels every other worker before
//! the process exits.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::broker::RealtimeBroker;
use crate::bus::EventBus;
use crate::camera::{CameraIngestor, CameraRing};
use crate::config::{Config, CAMERA_RING_CAPACITY};
use crate::correlator::Correlator;
use crate::persister::{NoopSecondaryStore, Persister, SqliteStore};
use crate::query::QuerySurface;
use crate::radar::RadarIngestor;
use crate::weather::WeatherIngestor;

#[derive(Debug, Clone, Copy)]
pub enum WorkerName {
    Radar,
    Weather,
    Camera,
    Correlator,
    Persister,
    Broker,
}

impl std::fmt::Display for WorkerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerName::Radar => "radar",
            WorkerName::Weather => "weather",
            WorkerName::Camera => "camera",
            WorkerName::Correlator => "correlator",
            WorkerName::Persister => "persister",
            WorkerName::Broker => "broker",
        };
        write!(f, "{name}")
    }
}

pub struct Supervisor {
    bus: Arc<dyn EventBus>,
    store: Arc<SqliteStore>,
    radar: RadarIngestor,
    weather: WeatherIngestor,
    camera: CameraIngestor,
    correlator: Correlator,
    persister: Persister,
    broker: Arc<RealtimeBroker>,
    query: Arc<QuerySurface>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Wires every component from a shared bus and store. The caller picks
    /// the `EventBus` backend (`RedisBus` in production, `InMemoryBus` in
    /// tests) and the SQLite path.
    pub fn new(bus: Arc<dyn EventBus>, store: Arc<SqliteStore>, cfg: &Config) -> Self {
        let camera_ring = Arc::new(CameraRing::new(CAMERA_RING_CAPACITY));

        let radar = RadarIngestor::new(bus.clone());
        let weather = WeatherIngestor::new(bus.clone(), cfg.weather.gpio_pin);
        let camera = CameraIngestor::new(bus.clone(), camera_ring.clone());
        let correlator = Correlator::new(bus.clone(), camera_ring);
        let persister = Persister::new(
            bus.clone(),
            store.clone(),
            Arc::new(NoopSecondaryStore),
            cfg.storage.retention_days,
        );
        let broker = Arc::new(RealtimeBroker::new(bus.clone()));

        let query = Arc::new(QuerySurface::new(
            bus.clone(),
            store.clone(),
            radar.counters(),
            weather.counters(),
            camera.counters(),
            correlator.counters(),
            persister.counters(),
            broker.counters(),
        ));

        Self {
            bus,
            store,
            radar,
            weather,
            camera,
            correlator,
            persister,
            broker,
            query,
            cancel: CancellationToken::new(),
        }
    }

    pub fn query_surface(&self) -> Arc<QuerySurface> {
        self.query.clone()
    }

    pub fn broker(&self) -> Arc<RealtimeBroker> {
        self.broker.clone()
    }

    pub fn bus(&self) -> Arc<dyn EventBus> {
        self.bus.clone()
    }

    pub fn store(&self) -> Arc<SqliteStore> {
        self.store.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns one task per component, waits for the first failure or an
    /// external cancellation, then joins every remaining worker with a 5 s
    /// timeout before returning.
    pub async fn run(self) -> Result<()> {
        let Supervisor {
            radar,
            weather,
            camera,
            correlator,
            persister,
            broker,
            cancel,
            ..
        } = self;

        let mut tasks: JoinSet<(WorkerName, ())> = JoinSet::new();

        let c = cancel.clone();
        tasks.spawn(async move {
            radar.run(c).await;
            (WorkerName::Radar, ())
        });

        let c = cancel.clone();
        tasks.spawn(async move {
            weather.run(c).await;
            (WorkerName::Weather, ())
        });

        let c = cancel.clone();
        tasks.spawn(async move {
            camera.run(c).await;
            (WorkerName::Camera, ())
        });

        let c = cancel.clone();
        tasks.spawn(async move {
            correlator.run(c).await;
            (WorkerName::Correlator, ())
        });

        let c = cancel.clone();
        tasks.spawn(async move {
            persister.run(c).await;
            (WorkerName::Persister, ())
        });

        let c = cancel.clone();
        tasks.spawn(async move {
            broker.run(c).await;
            (WorkerName::Broker, ())
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("supervisor: shutdown requested");
                    break;
                }
                result = tasks.join_next() => match result {
                    Some(Ok((name, ()))) => {
                        tracing::warn!(worker = %name, "worker exited, triggering shutdown");
                        cancel.cancel();
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "worker task panicked, triggering shutdown");
                        cancel.cancel();
                        break;
                    }
                    None => break,
                },
            }
        }

        let join_timeout = std::time::Duration::from_secs(crate::config::WORKER_SHUTDOWN_JOIN_SECS);
        if tokio::time::timeout(join_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_err()
        {
            tracing::warn!("supervisor: not all workers joined within the shutdown timeout");
        }

        Ok(())
    }
}
