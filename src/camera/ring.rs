//! Bounded ring of recent camera detections. Single writer (the Camera
//! Ingestor), single reader (the Correlator), sharing a short-held mutex —
//! matches a single-writer / single-reader split.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::config::CAMERA_RING_CAPACITY;
use crate::types::CameraDetection;

pub struct CameraRing {
    entries: Mutex<VecDeque<CameraDetection>>,
    capacity: usize,
}

impl Default for CameraRing {
    fn default() -> Self {
        Self::new(CAMERA_RING_CAPACITY)
    }
}

impl CameraRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Push a new detection, dropping the oldest if at capacity.
    pub fn push(&self, detection: CameraDetection) {
        let mut entries = self.entries.lock().expect("camera ring mutex poisoned");
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(detection);
    }

    /// Snapshot the ring, newest-first — the order the correlator walks it
    /// in when looking for the closest match.
    pub fn newest_first(&self) -> Vec<CameraDetection> {
        let entries = self.entries.lock().expect("camera ring mutex poisoned");
        entries.iter().rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn detection(id: &str) -> CameraDetection {
        CameraDetection {
            image_id: id.to_string(),
            timestamp: Utc::now(),
            vehicle_count: 1,
            vehicle_types: vec!["car".to_string()],
            primary_confidence: 0.9,
            image_path: format!("/images/{id}.jpg"),
        }
    }

    #[test]
    fn drops_oldest_at_capacity() {
        let ring = CameraRing::new(2);
        ring.push(detection("a"));
        ring.push(detection("b"));
        ring.push(detection("c"));
        let snapshot = ring.newest_first();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].image_id, "c");
        assert_eq!(snapshot[1].image_id, "b");
    }
}
