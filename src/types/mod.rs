//! Shared data model — radar readings, vehicle detections, camera/weather
//! snapshots, vehicle groups, and the consolidated record that ties them
//! together.
//!
//! Every entity here is a plain data type. Behavior (parsing, grouping,
//! correlation) lives in the owning component module; types only carry
//! invariants that are cheap to encode in the type itself (e.g. `AlertLevel`
//! as an enum rather than a string).

mod camera;
mod consolidated;
mod group;
mod radar;
mod weather;

pub use camera::CameraDetection;
pub use consolidated::{
    CameraData, ConsolidatedRecord, ConsolidationMethod, ProcessingMetadata, RadarData,
    WeatherSnapshot,
};
pub use group::{SpeedTrend, VehicleGroup};
pub use radar::{AlertLevel, SourceFormat, VehicleDetection};
pub use weather::{WeatherSample, WeatherSource};

/// Generate an 8-character lowercase hex id, used for both `detection_id`
/// and as the fallback `correlation_id` when none is supplied upstream.
pub fn random_hex_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).expect("radix 16 digit in 0..16"))
        .collect()
}
