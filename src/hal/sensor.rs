//! # Distance Sensor Capability
//!
//! Wraps a raw ultrasonic ranger with sample averaging and range validation.
//!
//! A reading outside the sensor's usable range, or one where every sample
//! failed, is reported as invalid with the sentinel distance
//! [`INVALID_DISTANCE_CM`]. Consumers only ever see that sentinel; there is
//! no separate "no data" state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::error::Result;

/// Distance reported by an invalid reading
pub const INVALID_DISTANCE_CM: f32 = -1.0;

/// Minimum settle time between two US-100 measurements
pub const SAMPLE_SPACING: Duration = Duration::from_millis(60);

/// Single raw distance measurement
#[async_trait]
pub trait DistanceSensor: Send {
    /// Prepares the sensor; failures are reported but not fatal to the node
    async fn init(&mut self) -> Result<()>;

    /// Takes one measurement in centimetres
    async fn measure_cm(&mut self) -> Result<f32>;
}

/// Validated distance reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceReading {
    pub valid: bool,
    /// Measured distance, or [`INVALID_DISTANCE_CM`]
    pub distance_cm: f32,
    pub timestamp: DateTime<Utc>,
}

impl DistanceReading {
    /// Builds the invalid sentinel reading
    pub fn invalid() -> Self {
        Self {
            valid: false,
            distance_cm: INVALID_DISTANCE_CM,
            timestamp: Utc::now(),
        }
    }

    fn valid(distance_cm: f32) -> Self {
        Self {
            valid: true,
            distance_cm,
            timestamp: Utc::now(),
        }
    }
}

/// Distance sensor with range limits and averaging
pub struct RangeFinder {
    sensor: Box<dyn DistanceSensor>,
    min_cm: f32,
    max_cm: f32,
    sample_spacing: Duration,
}

impl std::fmt::Debug for RangeFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeFinder")
            .field("min_cm", &self.min_cm)
            .field("max_cm", &self.max_cm)
            .finish_non_exhaustive()
    }
}

impl RangeFinder {
    /// Creates a range finder accepting distances within `[min_cm, max_cm]`
    pub fn new(sensor: Box<dyn DistanceSensor>, min_cm: f32, max_cm: f32) -> Self {
        Self {
            sensor,
            min_cm,
            max_cm,
            sample_spacing: SAMPLE_SPACING,
        }
    }

    /// Overrides the pause between averaged samples
    pub fn with_sample_spacing(mut self, spacing: Duration) -> Self {
        self.sample_spacing = spacing;
        self
    }

    pub async fn init(&mut self) -> Result<()> {
        self.sensor.init().await
    }

    /// Takes one validated reading
    pub async fn read(&mut self) -> DistanceReading {
        match self.sensor.measure_cm().await {
            Ok(distance) => self.validate(distance),
            Err(e) => {
                debug!("Distance measurement failed: {}", e);
                DistanceReading::invalid()
            }
        }
    }

    /// Averages up to `samples` measurements, skipping failed ones.
    ///
    /// The average is validated against the range limits. If every sample
    /// fails the reading is invalid.
    pub async fn read_averaged(&mut self, samples: u8) -> DistanceReading {
        let samples = samples.max(1);
        let mut sum = 0.0f32;
        let mut good = 0u32;

        for i in 0..samples {
            match self.sensor.measure_cm().await {
                Ok(distance) if distance > 0.0 => {
                    sum += distance;
                    good += 1;
                }
                Ok(_) => debug!("Discarding non-positive sample {}", i),
                Err(e) => debug!("Sample {} failed: {}", i, e),
            }
            if i + 1 < samples {
                sleep(self.sample_spacing).await;
            }
        }

        if good == 0 {
            warn!("All {} distance samples failed", samples);
            return DistanceReading::invalid();
        }

        let reading = self.validate(sum / good as f32);
        debug!(
            "Averaged distance: {:.2} cm ({}/{} samples, valid: {})",
            sum / good as f32,
            good,
            samples,
            reading.valid
        );
        reading
    }

    fn validate(&self, distance: f32) -> DistanceReading {
        if distance < self.min_cm || distance > self.max_cm {
            DistanceReading::invalid()
        } else {
            DistanceReading::valid(distance)
        }
    }
}
