//! # Hardware Capability Module
//!
//! Capability traits consumed by the link layers and the orchestrator.
//!
//! This module defines:
//! - The modem capability (power, SIM, registration, data bearer)
//! - The distance sensor capability and range validation
//! - The GNSS location capability with default-coordinate fallback
//! - The battery monitoring capability
//! - The status indicator (blink patterns)
//!
//! Concrete serial drivers live in [`crate::drivers`]; tests use the fakes in
//! `hal::mocks`.

pub mod gnss;
pub mod modem;
pub mod power;
pub mod sensor;
pub mod status;

#[cfg(test)]
pub mod mocks;

pub use gnss::{Coordinates, LocationFix, Locator};
pub use modem::{check_sim, Modem, ModemStatus, SimStatus};
pub use power::{PowerMonitor, PowerStatus};
pub use sensor::{DistanceReading, DistanceSensor, RangeFinder};
pub use status::{BlinkPattern, StatusIndicator};
