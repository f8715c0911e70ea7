//! Hourly rollup accumulator: per-wall-clock-hour counts, a running mean
//! speed, and a running max speed, read by the Query Surface and pushed
//! to the bus as each window closes for the Persister to fold into
//! `daily_summary`.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AlertLevel, VehicleDetection};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyStats {
    pub window_start: DateTime<Utc>,
    pub vehicle_count: u64,
    pub noise: u64,
    pub normal: u64,
    pub low: u64,
    pub high: u64,
    pub max_speed_mph: f64,
    speed_sum: f64,
}

impl HourlyStats {
    fn new(window_start: DateTime<Utc>) -> Self {
        Self {
            window_start,
            vehicle_count: 0,
            noise: 0,
            normal: 0,
            low: 0,
            high: 0,
            max_speed_mph: 0.0,
            speed_sum: 0.0,
        }
    }

    pub fn mean_speed_mph(&self) -> f64 {
        if self.vehicle_count == 0 {
            0.0
        } else {
            self.speed_sum / self.vehicle_count as f64
        }
    }

    fn record(&mut self, detection: &VehicleDetection) {
        self.vehicle_count += 1;
        self.speed_sum += detection.speed_mph.abs();
        self.max_speed_mph = self.max_speed_mph.max(detection.speed_mph.abs());
        match detection.alert_level {
            AlertLevel::Noise => self.noise += 1,
            AlertLevel::Normal => self.normal += 1,
            AlertLevel::Low => self.low += 1,
            AlertLevel::High => self.high += 1,
        }
    }
}

/// Tracks the current hour's `HourlyStats`, rolling over (and returning the
/// closed window) whenever `record` or `maybe_roll` crosses an hour boundary.
pub struct HourlyAccumulator {
    current: HourlyStats,
}

impl Default for HourlyAccumulator {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl HourlyAccumulator {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            current: HourlyStats::new(truncate_to_hour(now)),
        }
    }

    pub fn snapshot(&self) -> HourlyStats {
        self.current.clone()
    }

    /// Record a detection, rolling over first if `now` has crossed into a
    /// new hour. Returns the just-closed window when a rollover happened.
    pub fn record(&mut self, detection: &VehicleDetection, now: DateTime<Utc>) -> Option<HourlyStats> {
        let closed = self.roll_if_needed(now);
        self.current.record(detection);
        closed
    }

    pub fn roll_if_needed(&mut self, now: DateTime<Utc>) -> Option<HourlyStats> {
        let bucket = truncate_to_hour(now);
        if bucket > self.current.window_start {
            let closed = std::mem::replace(&mut self.current, HourlyStats::new(bucket));
            Some(closed)
        } else {
            None
        }
    }
}

fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceFormat;

    fn detection(speed_mph: f64, alert: AlertLevel, ts: DateTime<Utc>) -> VehicleDetection {
        VehicleDetection {
            detection_id: "d".into(),
            correlation_id: "c".into(),
            timestamp: ts,
            speed_mph,
            speed_mps: speed_mph * 0.44704,
            alert_level: alert,
            source_format: SourceFormat::Csv,
            magnitude: "m".into(),
            unit: "mph".into(),
            raw: String::new(),
        }
    }

    #[test]
    fn accumulates_within_same_hour() {
        let t0 = Utc::now();
        let mut acc = HourlyAccumulator::new(t0);
        acc.record(&detection(10.0, AlertLevel::Low, t0), t0);
        acc.record(&detection(30.0, AlertLevel::High, t0), t0);
        let snap = acc.snapshot();
        assert_eq!(snap.vehicle_count, 2);
        assert_eq!(snap.low, 1);
        assert_eq!(snap.high, 1);
        assert!((snap.mean_speed_mph() - 20.0).abs() < 1e-9);
        assert!((snap.max_speed_mph - 30.0).abs() < 1e-9);
    }

    #[test]
    fn rollover_returns_closed_window() {
        let t0 = Utc::now();
        let mut acc = HourlyAccumulator::new(t0);
        acc.record(&detection(10.0, AlertLevel::Low, t0), t0);
        let next_hour = t0 + chrono::Duration::hours(1);
        let closed = acc.record(&detection(5.0, AlertLevel::Normal, next_hour), next_hour);
        assert!(closed.is_some());
        assert_eq!(closed.unwrap().vehicle_count, 1);
        assert_eq!(acc.snapshot().vehicle_count, 1);
    }
}
