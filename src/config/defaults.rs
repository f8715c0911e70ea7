//! Hardcoded defaults, named so every threshold used across the pipeline has
//! exactly one place it's defined.

/// Below this absolute speed (mph), a radar reading is noise and is not
/// published.
pub const NOISE_THRESHOLD_MPH: f64 = 2.0;
/// At or above this absolute speed (mph), alert_level = low.
pub const LOW_THRESHOLD_MPH: f64 = 2.0;
/// At or above this absolute speed (mph), alert_level = high.
pub const HIGH_THRESHOLD_MPH: f64 = 26.0;

/// m/s -> mph conversion factor.
pub const MPS_TO_MPH: f64 = 2.237;

/// Duplicate-grouping window (seconds): successive detections within this
/// span of the group's latest detection are candidates for merging.
pub const GROUPING_WINDOW_SECS: i64 = 3;
/// Allowed absolute-speed delta (mph) between a candidate detection and the
/// group's latest speed.
pub const SPEED_VARIATION_MPH: f64 = 5.0;
/// How often the group table is swept for eviction (seconds).
pub const GROUP_SWEEP_INTERVAL_SECS: u64 = 30;
/// Bounded cardinality of the group table (LRU-evicted beyond this).
pub const GROUP_TABLE_CAPACITY: usize = 100;

/// Camera-to-radar correlation window (seconds).
pub const CAMERA_WINDOW_SECS: i64 = 10;
/// Camera ring capacity (most recent N detections).
pub const CAMERA_RING_CAPACITY: usize = 100;

/// Default retention window for persisted records (days).
pub const DEFAULT_RETENTION_DAYS: i64 = 90;
/// Default persister batch size.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Persister idle-commit interval (seconds).
pub const BATCH_IDLE_SECS: u64 = 30;
/// Retention cleanup cadence (seconds).
pub const RETENTION_SWEEP_INTERVAL_SECS: u64 = 3_600;

/// Weather time-series trim window (hours).
pub const WEATHER_SERIES_RETENTION_HOURS: i64 = 24;
/// TTL applied to "latest value" keys (seconds).
pub const LATEST_VALUE_TTL_SECS: u64 = 3_600;
/// Default weather read interval (seconds).
pub const DEFAULT_WEATHER_INTERVAL_SECS: u64 = 600;

/// Per-operation timeouts.
pub const SERIAL_READ_TIMEOUT_SECS: u64 = 1;
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const STREAM_CONSUME_BLOCK_SECS: u64 = 1;
pub const SUBSCRIBER_SEND_TIMEOUT_SECS: u64 = 1;
pub const WORKER_SHUTDOWN_JOIN_SECS: u64 = 5;

/// Minimum idle time (ms) before a pending stream entry is eligible for
/// reclaim via XAUTOCLAIM — covers both a consumer's own PEL after a
/// restart and entries abandoned by a consumer that died mid-processing.
pub const CLAIM_MIN_IDLE_MS: i64 = 30_000;

/// Consumer-group batch size for the Correlator.
pub const CORRELATOR_BATCH_SIZE: usize = 10;

pub const STREAM_RADAR: &str = "traffic:radar";
pub const STREAM_CONSOLIDATED: &str = "traffic:consolidated";
pub const GROUP_CONSOLIDATOR: &str = "consolidator-group";
pub const GROUP_PERSISTER: &str = "persister-group";
pub const CHANNEL_TRAFFIC_EVENTS: &str = "traffic_events";
pub const CHANNEL_CAMERA_DETECTIONS: &str = "camera_detections";
pub const CHANNEL_SYSTEM_LOG: &str = "system_log";
pub const CHANNEL_CONSOLIDATED_QUEUED: &str = "consolidated_data_queued";
pub const KEY_WEATHER_LOCAL: &str = "weather:dht22";
pub const KEY_WEATHER_AIRPORT: &str = "weather:airport:latest";
pub const BOUNDED_LIST_PREFIX: &str = "traffic:recent:";
pub const KEY_HOURLY_SUMMARY: &str = "traffic:recent:hourly_summary";
/// Bounded history of hourly summaries kept in the bus (one day's worth).
pub const HOURLY_SUMMARY_HISTORY: usize = 24;

/// Bounded log of noteworthy (high-alert) consolidated records, tailed by
/// the Query Surface independently of the SQLite-backed history.
pub const KEY_BUSINESS_EVENTS: &str = "traffic:recent:business_events";
pub const BUSINESS_EVENTS_HISTORY: usize = 200;
