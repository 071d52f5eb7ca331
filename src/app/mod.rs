//! # App Module
//!
//! The top-level duty cycle: read sensors, publish, idle, recover.

pub mod orchestrator;

pub use orchestrator::{AppState, Peripherals, SensorSnapshot, TelemetryOrchestrator};
