//! The `VehicleGroup` table: exclusively owned and mutated by
//! the Correlator. Single-writer, so no internal locking — the table lives
//! inside the worker's own loop.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::config::{GROUPING_WINDOW_SECS, GROUP_TABLE_CAPACITY, SPEED_VARIATION_MPH};
use crate::types::{VehicleDetection, VehicleGroup};

/// Ordered (by most-recent-touch) table of active vehicle groups, bounded
/// to `GROUP_TABLE_CAPACITY` and LRU-evicted beyond that.
pub struct GroupTable {
    groups: HashMap<String, VehicleGroup>,
    /// Most-recently-touched group ids, oldest first. A group can appear
    /// more than once before compaction; `touch_order` is only consulted
    /// lazily (stale entries are skipped when they no longer exist).
    touch_order: VecDeque<String>,
}

impl Default for GroupTable {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupTable {
    pub fn new() -> Self {
        Self {
            groups: HashMap::new(),
            touch_order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Find the newest-first matching group for `detection`: a group
    /// within the grouping window, within the speed-variation band, and
    /// moving the same direction.
    fn find_match(&self, detection: &VehicleDetection) -> Option<String> {
        let mut candidates: Vec<&VehicleGroup> = self.groups.values().collect();
        candidates.sort_by(|a, b| b.latest_timestamp.cmp(&a.latest_timestamp));

        for group in candidates {
            let age = detection.timestamp - group.latest_timestamp;
            if age.num_milliseconds() < 0 {
                continue; // out-of-order detection relative to this group
            }
            if age.num_seconds() > GROUPING_WINDOW_SECS {
                continue;
            }
            let speed_delta = (detection.speed_mph.abs() - group.latest_speed_mph.abs()).abs();
            if speed_delta > SPEED_VARIATION_MPH {
                continue;
            }
            let same_direction = detection.speed_mps.signum() == group.latest_speed_mps.signum();
            if !same_direction {
                continue;
            }
            return Some(group.group_id.clone());
        }
        None
    }

    /// Apply a detection: either extend a matching group (returning
    /// `GroupOutcome::Extended`, no record to emit) or create a new one
    /// (`GroupOutcome::Created`, the triggering record).
    pub fn apply(&mut self, detection: VehicleDetection) -> GroupOutcome {
        if let Some(group_id) = self.find_match(&detection) {
            let group = self
                .groups
                .get_mut(&group_id)
                .expect("find_match returned an id not present in the table");
            group.extend(detection);
            self.touch(&group_id);
            return GroupOutcome::Extended(group_id);
        }

        self.evict_if_at_capacity();
        let group_id = new_group_id();
        let group = VehicleGroup::new(group_id.clone(), detection);
        self.groups.insert(group_id.clone(), group);
        self.touch(&group_id);
        GroupOutcome::Created(group_id)
    }

    pub fn get(&self, group_id: &str) -> Option<&VehicleGroup> {
        self.groups.get(group_id)
    }

    fn touch(&mut self, group_id: &str) {
        self.touch_order.push_back(group_id.to_string());
    }

    fn evict_if_at_capacity(&mut self) {
        while self.groups.len() >= GROUP_TABLE_CAPACITY {
            let Some(oldest) = self.touch_order.pop_front() else {
                break;
            };
            self.groups.remove(&oldest);
        }
    }

    /// Sweep eviction: remove groups whose `latest_timestamp` is
    /// older than `2 * GROUPING_WINDOW` relative to `now`. Returns the
    /// number evicted.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::seconds(2 * GROUPING_WINDOW_SECS);
        let before = self.groups.len();
        self.groups.retain(|_, group| group.latest_timestamp >= cutoff);
        self.touch_order.retain(|id| self.groups.contains_key(id));
        before - self.groups.len()
    }
}

#[derive(Debug, Clone)]
pub enum GroupOutcome {
    Created(String),
    Extended(String),
}

fn new_group_id() -> String {
    use rand::Rng;
    let suffix: String = {
        let mut rng = rand::thread_rng();
        (0..4)
            .map(|_| std::char::from_digit(rng.gen_range(0..10), 10).expect("decimal digit"))
            .collect()
    };
    format!("vehicle_{}_{}", Utc::now().timestamp(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertLevel, SourceFormat};

    fn detection(speed_mph: f64, ts: DateTime<Utc>) -> VehicleDetection {
        VehicleDetection {
            detection_id: crate::types::random_hex_id(),
            correlation_id: "seed".into(),
            timestamp: ts,
            speed_mph,
            speed_mps: speed_mph * 0.44704,
            alert_level: AlertLevel::High,
            source_format: SourceFormat::Csv,
            magnitude: "m".into(),
            unit: "mph".into(),
            raw: String::new(),
        }
    }

    #[test]
    fn duplicate_within_window_extends_group() {
        let mut table = GroupTable::new();
        let t0 = Utc::now();
        let first = table.apply(detection(30.0, t0));
        let group_id = match first {
            GroupOutcome::Created(id) => id,
            _ => panic!("expected Created"),
        };

        let second = table.apply(detection(28.5, t0 + chrono::Duration::milliseconds(1200)));
        match second {
            GroupOutcome::Extended(id) => assert_eq!(id, group_id),
            _ => panic!("expected Extended"),
        }
        assert_eq!(table.get(&group_id).unwrap().detection_count(), 2);
    }

    #[test]
    fn direction_change_creates_new_group() {
        let mut table = GroupTable::new();
        let t0 = Utc::now();
        table.apply(detection(-15.0, t0));
        let second = table.apply(detection(15.0, t0 + chrono::Duration::milliseconds(1000)));
        assert!(matches!(second, GroupOutcome::Created(_)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn sweep_evicts_stale_groups() {
        let mut table = GroupTable::new();
        let t0 = Utc::now() - chrono::Duration::seconds(10);
        table.apply(detection(30.0, t0));
        let evicted = table.sweep(Utc::now());
        assert_eq!(evicted, 1);
        assert!(table.is_empty());
    }

    #[test]
    fn sweep_keeps_recent_groups() {
        let mut table = GroupTable::new();
        table.apply(detection(30.0, Utc::now()));
        let evicted = table.sweep(Utc::now());
        assert_eq!(evicted, 0);
        assert_eq!(table.len(), 1);
    }
}
