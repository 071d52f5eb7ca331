//! # Telemetry Module
//!
//! The published sample and its wire form.
//!
//! This module handles:
//! - Fill-level computation from a distance reading
//! - Assembling the immutable [`TelemetrySample`]
//! - JSON payload encoding
//! - Topic derivation (`{prefix}/{device_id}/{suffix}`)

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Fill level reported when the distance reading is invalid
pub const FILL_LEVEL_UNKNOWN: i8 = -1;

/// Converts a sensor-to-surface distance into a fill percentage.
///
/// A negative distance is the invalid-reading sentinel and yields `-1`.
/// Otherwise the result is `(height - distance) / height * 100`, clamped to
/// 0..=100 and truncated. Short distances mean a full container.
pub fn fill_level(distance_cm: f32, container_height_cm: f32) -> i8 {
    if distance_cm < 0.0 {
        return FILL_LEVEL_UNKNOWN;
    }
    if container_height_cm <= 0.0 {
        return FILL_LEVEL_UNKNOWN;
    }

    let percent = (container_height_cm - distance_cm) / container_height_cm * 100.0;
    percent.clamp(0.0, 100.0) as i8
}

/// One publish cycle's worth of data; built once, never mutated
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub battery_percentage: u8,
    /// -1 or 0-100
    pub fill_level_percent: i8,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Location {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Payload {
    device_id: String,
    location: Location,
    battery_level: u8,
    fill_level: i8,
}

impl TelemetrySample {
    /// Encodes the broker payload
    pub fn to_json(&self) -> Result<String> {
        let payload = Payload {
            device_id: self.device_id.clone(),
            location: Location {
                latitude: self.latitude,
                longitude: self.longitude,
            },
            battery_level: self.battery_percentage,
            fill_level: self.fill_level_percent,
        };
        Ok(serde_json::to_string(&payload)?)
    }
}

/// Topic layout for telemetry publishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    pub prefix: String,
    pub suffix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self {
            prefix: "smartwaste".to_string(),
            suffix: "data".to_string(),
        }
    }
}

impl TopicScheme {
    pub fn new(prefix: &str, suffix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        }
    }

    pub fn topic_for(&self, device_id: &str) -> String {
        format!("{}/{}/{}", self.prefix, device_id, self.suffix)
    }
}
