//! End-to-end pipeline tests driven purely through the public `EventBus`
//! surface: a radar detection is published the way the Radar Ingestor would
//! publish it, and the test asserts on what the Correlator, Persister, and
//! Query Surface produce from it. No hardware ingestors are involved; the
//! bus boundary is the seam a real radar/weather/camera sensor would cross.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use trafficwatch::broker::RealtimeBroker;
use trafficwatch::bus::{EventBus, Fields, InMemoryBus};
use trafficwatch::camera::{CameraCounters, CameraRing};
use trafficwatch::config::{self, GROUP_CONSOLIDATOR, GROUP_PERSISTER, STREAM_CONSOLIDATED, STREAM_RADAR};
use trafficwatch::correlator::Correlator;
use trafficwatch::persister::{NoopSecondaryStore, Persister, SqliteStore};
use trafficwatch::query::QuerySurface;
use trafficwatch::radar::RadarCounters;
use trafficwatch::types::{random_hex_id, AlertLevel};
use trafficwatch::weather::WeatherCounters;

fn ensure_config() {
    if !config::is_initialized() {
        config::init(config::Config::for_tests());
    }
}

fn radar_fields(speed_mph: f64) -> Fields {
    let mut f = Fields::new();
    let alert = if speed_mph.abs() >= 26.0 {
        "high"
    } else if speed_mph.abs() >= 2.0 {
        "low"
    } else {
        "noise"
    };
    f.insert("speed".to_string(), speed_mph.to_string());
    f.insert("speed_mps".to_string(), (speed_mph / 2.237).to_string());
    f.insert("magnitude".to_string(), "m".to_string());
    f.insert("unit".to_string(), "mph".to_string());
    f.insert("alert_level".to_string(), alert.to_string());
    f.insert("detection_id".to_string(), random_hex_id());
    f.insert("correlation_id".to_string(), random_hex_id());
    f.insert("_timestamp".to_string(), Utc::now().to_rfc3339());
    f.insert("_raw".to_string(), format!("\"m\",{speed_mph}"));
    f.insert("_source".to_string(), "radar".to_string());
    f.insert("_format".to_string(), "csv".to_string());
    f
}

struct Harness {
    bus: Arc<InMemoryBus>,
    store: Arc<SqliteStore>,
    query: Arc<QuerySurface>,
}

impl Harness {
    fn new() -> Self {
        ensure_config();
        let bus = Arc::new(InMemoryBus::new());
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let broker_bus: Arc<dyn EventBus> = bus.clone();
        let broker = RealtimeBroker::new(broker_bus);
        let query = Arc::new(QuerySurface::new(
            bus.clone(),
            store.clone(),
            Arc::new(RadarCounters::default()),
            Arc::new(WeatherCounters::default()),
            Arc::new(CameraCounters::default()),
            Arc::new(trafficwatch::correlator::CorrelatorCounters::default()),
            Arc::new(trafficwatch::persister::PersisterCounters::default()),
            broker.counters(),
        ));
        Self { bus, store, query }
    }

    fn dyn_bus(&self) -> Arc<dyn EventBus> {
        self.bus.clone()
    }

    /// Runs the Correlator and Persister over whatever is currently queued
    /// on the radar stream, then stops. No background tasks survive this
    /// call — each test drives the pipeline one step at a time.
    async fn drain(&self) {
        let bus = self.dyn_bus();
        let ring = Arc::new(CameraRing::new(10));
        let mut correlator = Correlator::new(bus.clone(), ring);
        correlator
            .run(one_shot_cancel(bus.clone(), STREAM_RADAR, GROUP_CONSOLIDATOR).await)
            .await;

        let persister = Persister::new(bus.clone(), self.store.clone(), Arc::new(NoopSecondaryStore), 90);
        persister
            .run(one_shot_cancel(bus.clone(), STREAM_CONSOLIDATED, GROUP_PERSISTER).await)
            .await;
    }
}

/// A `CancellationToken` that fires as soon as `stream` has nothing left
/// pending for a fresh consumer in `group`. Lets `Correlator::run`/
/// `Persister::run` drive to completion over a fixed batch instead of
/// blocking forever on an idle stream.
async fn one_shot_cancel(bus: Arc<dyn EventBus>, stream: &str, group: &str) -> CancellationToken {
    let cancel = CancellationToken::new();
    let bus = bus.clone();
    let stream = stream.to_string();
    let group = group.to_string();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        // Give the freshly-spawned consumer loop one pass to claim pending
        // entries, then cancel: `consume_group` with a short block returns
        // promptly once the stream is drained.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = bus.ensure_group(&stream, &group).await;
        watcher.cancel();
    });
    cancel
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn radar_detection_flows_through_to_persisted_record() {
    let h = Harness::new();
    h.bus.ensure_group(STREAM_RADAR, GROUP_CONSOLIDATOR).await.unwrap();
    h.bus
        .publish_stream(STREAM_RADAR, radar_fields(30.0))
        .await
        .unwrap();

    h.drain().await;

    let recent = h.query.recent_consolidated(10, None).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert!((recent[0].radar_data.speed_mph - 30.0).abs() < 1e-9);
    assert_eq!(recent[0].radar_data.alert_level, AlertLevel::High);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_detections_within_window_consolidate_once() {
    let h = Harness::new();
    h.bus.ensure_group(STREAM_RADAR, GROUP_CONSOLIDATOR).await.unwrap();
    h.bus.publish_stream(STREAM_RADAR, radar_fields(30.0)).await.unwrap();
    h.bus.publish_stream(STREAM_RADAR, radar_fields(29.0)).await.unwrap();

    h.drain().await;

    let recent = h.query.recent_consolidated(10, None).await.unwrap();
    assert_eq!(recent.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn high_alert_detection_surfaces_as_a_business_event() {
    let h = Harness::new();
    h.bus.ensure_group(STREAM_RADAR, GROUP_CONSOLIDATOR).await.unwrap();
    h.bus.publish_stream(STREAM_RADAR, radar_fields(40.0)).await.unwrap();

    h.drain().await;

    let events = h.query.recent_business_events(10).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].radar_data.alert_level, AlertLevel::High);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn low_alert_detection_does_not_surface_as_a_business_event() {
    let h = Harness::new();
    h.bus.ensure_group(STREAM_RADAR, GROUP_CONSOLIDATOR).await.unwrap();
    h.bus.publish_stream(STREAM_RADAR, radar_fields(10.0)).await.unwrap();

    h.drain().await;

    assert!(h.query.recent_business_events(10).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_radar_message_is_dropped_without_breaking_the_pipeline() {
    let h = Harness::new();
    h.bus.ensure_group(STREAM_RADAR, GROUP_CONSOLIDATOR).await.unwrap();

    let mut bad = Fields::new();
    bad.insert("speed".to_string(), "not-a-number".to_string());
    h.bus.publish_stream(STREAM_RADAR, bad).await.unwrap();
    h.bus.publish_stream(STREAM_RADAR, radar_fields(30.0)).await.unwrap();

    h.drain().await;

    let recent = h.query.recent_consolidated(10, None).await.unwrap();
    assert_eq!(recent.len(), 1);
}

#[tokio::test]
async fn broker_relays_a_realtime_event_to_a_connected_subscriber() {
    ensure_config();
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let broker = Arc::new(RealtimeBroker::new(bus.clone()));
    let mut sub = broker.subscribe();

    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let runner = broker.clone();
    let handle = tokio::spawn(async move { runner.run(run_cancel).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    bus.publish_pubsub(config::CHANNEL_TRAFFIC_EVENTS, "{\"speed\":30}")
        .await
        .unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(1), sub.receiver.recv())
        .await
        .expect("timed out waiting for relayed event")
        .unwrap();
    assert!(matches!(
        msg,
        trafficwatch::broker::BrokerMessage::RealTimeEvent(p) if p.contains("30")
    ));

    cancel.cancel();
    let _ = handle.await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_snapshot_reflects_pipeline_activity() {
    let h = Harness::new();
    h.bus.ensure_group(STREAM_RADAR, GROUP_CONSOLIDATOR).await.unwrap();
    h.bus.publish_stream(STREAM_RADAR, radar_fields(30.0)).await.unwrap();

    h.drain().await;

    let snapshot = h.query.health();
    assert_eq!(snapshot.status, "healthy");
    assert_eq!(snapshot.persister_messages_processed, 1);
}
