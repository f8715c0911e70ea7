//! Camera detection events, as normalized from the external AI camera
//! process's pub/sub messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One AI-camera detection event, after normalization by the camera
/// ingestor. Held in a bounded ring by the correlator; never persisted on
/// its own (only embedded into a `ConsolidatedRecord` when matched).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraDetection {
    pub image_id: String,
    pub timestamp: DateTime<Utc>,
    pub vehicle_count: u32,
    pub vehicle_types: Vec<String>,
    pub primary_confidence: f64,
    pub image_path: String,
}
