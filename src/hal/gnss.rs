//! # GNSS Location Capability
//!
//! Location fixes with a default-coordinate fallback.
//!
//! Telemetry always carries a coordinate: when no fix is available the
//! latitude and longitude of an invalid [`LocationFix`] hold the configured
//! default location instead of being left unset.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::timing::{Deadline, DEFAULT_POLL_INTERVAL};

/// Latitude / longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// GNSS fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub valid: bool,
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above mean sea level
    pub altitude: f32,
    pub speed_kmh: f32,
    /// Horizontal accuracy in metres
    pub accuracy: f32,
    pub satellites: u8,
    pub timestamp: DateTime<Utc>,
}

impl LocationFix {
    /// Invalid fix carrying the default coordinates
    pub fn fallback(default: Coordinates) -> Self {
        Self {
            valid: false,
            latitude: default.latitude,
            longitude: default.longitude,
            altitude: 0.0,
            speed_kmh: 0.0,
            accuracy: 0.0,
            satellites: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// GNSS receiver operations
#[async_trait]
pub trait Locator: Send {
    /// Powers the receiver on
    async fn enable(&mut self) -> Result<()>;

    async fn disable(&mut self) -> Result<()>;

    fn is_enabled(&self) -> bool;

    /// Single fix query; `Ok(None)` while the receiver has no fix
    async fn poll_fix(&mut self) -> Result<Option<LocationFix>>;
}

/// Polls `locator` for a fix until `timeout` elapses or `cancel` fires.
///
/// Returns the first valid fix, otherwise [`LocationFix::fallback`] with the
/// default coordinates. A disabled receiver falls back immediately.
pub async fn locate<L: Locator + ?Sized>(
    locator: &mut L,
    timeout: Duration,
    default: Coordinates,
    cancel: &CancellationToken,
) -> LocationFix {
    if !locator.is_enabled() {
        debug!("GNSS receiver not enabled, using default location");
        return LocationFix::fallback(default);
    }

    let deadline = Deadline::after(timeout, DEFAULT_POLL_INTERVAL);
    loop {
        match locator.poll_fix().await {
            Ok(Some(fix)) if fix.valid => {
                info!(
                    "Fix obtained: {:.6}, {:.6} (sats: {})",
                    fix.latitude, fix.longitude, fix.satellites
                );
                return fix;
            }
            Ok(_) => {}
            Err(e) => debug!("GNSS query failed: {}", e),
        }

        if !deadline.tick(cancel).await {
            warn!("GNSS fix timeout, using default location");
            return LocationFix::fallback(default);
        }
    }
}
