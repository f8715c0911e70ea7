//! SQLite schema: relational tables plus their indexes.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS traffic_detections (
    id              TEXT PRIMARY KEY,
    timestamp       REAL NOT NULL,
    correlation_id  TEXT NOT NULL,
    trigger_source  TEXT NOT NULL,
    confidence_score REAL,
    vehicle_count   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS radar_detections (
    detection_id    TEXT NOT NULL REFERENCES traffic_detections(id),
    speed_mph       REAL NOT NULL,
    speed_mps       REAL NOT NULL,
    alert_level     TEXT NOT NULL,
    direction       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS consolidated_events (
    consolidation_id TEXT PRIMARY KEY,
    event_json       TEXT NOT NULL,
    created_at       REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_summary (
    date             TEXT PRIMARY KEY,
    total_detections INTEGER NOT NULL,
    avg_speed        REAL NOT NULL,
    max_speed        REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_traffic_detections_timestamp ON traffic_detections(timestamp);
CREATE INDEX IF NOT EXISTS idx_traffic_detections_correlation_id ON traffic_detections(correlation_id);
CREATE INDEX IF NOT EXISTS idx_traffic_detections_trigger_source ON traffic_detections(trigger_source);
CREATE INDEX IF NOT EXISTS idx_radar_detections_speed_not_null ON radar_detections(speed_mph) WHERE speed_mph IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_consolidated_events_created_at ON consolidated_events(created_at);
"#;
