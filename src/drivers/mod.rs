//! # Device Drivers
//!
//! Serial drivers implementing the capabilities in [`crate::hal`]:
//! - [`sim7000`]: cellular modem and its GNSS receiver over AT commands
//! - [`us100`]: ultrasonic ranger in UART mode

pub mod at;
pub mod sim7000;
pub mod us100;

pub use at::AtChannel;
pub use sim7000::{Sim7000, Sim7000Gnss};
pub use us100::Us100;
