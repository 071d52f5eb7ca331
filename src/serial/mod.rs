//! # Serial Communication Module
//!
//! Opens the UARTs used by the modem and the ultrasonic sensor.
//!
//! Both devices use 8N1 framing without flow control; only the baud rate
//! differs.

pub mod port_trait;

pub use port_trait::{SerialPortIO, TokioSerialPort};

use crate::error::{NodeError, Result};
use tokio_serial::SerialPortBuilderExt;
use tracing::info;

/// US-100 serial mode baud rate
pub const US100_BAUD_RATE: u32 = 9600;

/// Open a serial port with 8N1 settings
///
/// # Arguments
///
/// * `path` - Device path (e.g., "/dev/ttyUSB2")
/// * `baud_rate` - Line speed
///
/// # Errors
///
/// Returns `NodeError::Serial` naming the path if the port cannot be opened
///
/// # Examples
///
/// ```no_run
/// use smartwaste_node::serial::open_port;
///
/// # async fn run() -> smartwaste_node::error::Result<()> {
/// let modem_port = open_port("/dev/ttyUSB2", 115_200)?;
/// # Ok(())
/// # }
/// ```
pub fn open_port(path: &str, baud_rate: u32) -> Result<TokioSerialPort> {
    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| NodeError::Serial(format!("Failed to open {}: {}", path, e)))?;

    info!("Opened {} at {} baud", path, baud_rate);
    Ok(TokioSerialPort::new(port))
}
