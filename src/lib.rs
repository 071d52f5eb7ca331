//! # SmartWaste Node Library
//!
//! Fill-level telemetry for waste containers over a cellular MQTT link.
//!
//! A node measures the distance to the waste surface with an ultrasonic
//! ranger, converts it into a fill percentage, attaches battery level and
//! location, and publishes the sample as JSON through a SIM7000 modem.

pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod hal;
pub mod link;
pub mod serial;
pub mod telemetry;
pub mod timing;
