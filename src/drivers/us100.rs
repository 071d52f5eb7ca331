//! US-100 ultrasonic ranger in UART mode
//!
//! Writing `0x55` triggers a measurement; the sensor answers with the
//! distance in millimetres as two bytes, high byte first.

use async_trait::async_trait;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, info};

use crate::error::{NodeError, Result};
use crate::hal::DistanceSensor;
use crate::serial::SerialPortIO;

/// Distance trigger command
const TRIGGER_DISTANCE: u8 = 0x55;

pub struct Us100<P> {
    port: P,
    timeout: Duration,
}

impl<P: SerialPortIO> Us100<P> {
    /// `timeout` bounds the wait for each two-byte answer
    pub fn new(port: P, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    async fn discard_input(&mut self) {
        if let Err(e) = self.port.clear_input().await {
            debug!("Failed to clear US-100 input: {}", e);
        }
    }

    async fn measure_mm(&mut self) -> Result<u16> {
        // A late answer to a timed-out trigger would shift every later frame
        self.discard_input().await;

        self.port
            .write_all(&[TRIGGER_DISTANCE])
            .await
            .map_err(|e| NodeError::Serial(format!("Failed to trigger US-100: {}", e)))?;
        self.port
            .flush()
            .await
            .map_err(|e| NodeError::Serial(format!("Failed to flush serial port: {}", e)))?;

        let deadline = Instant::now() + self.timeout;
        let mut frame = [0u8; 2];
        let mut filled = 0;
        while filled < frame.len() {
            match timeout_at(deadline, self.port.read(&mut frame[filled..])).await {
                Err(_) => {
                    debug!("US-100 answered {} of 2 bytes", filled);
                    self.discard_input().await;
                    return Err(NodeError::SensorInvalid);
                }
                Ok(Ok(0)) => return Err(NodeError::Serial("serial port closed".to_string())),
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => return Err(NodeError::Serial(format!("Failed to read: {}", e))),
            }
        }

        Ok(u16::from_be_bytes(frame))
    }
}

#[async_trait]
impl<P: SerialPortIO> DistanceSensor for Us100<P> {
    async fn init(&mut self) -> Result<()> {
        let mm = self.measure_mm().await?;
        info!("US-100 responding ({} mm)", mm);
        Ok(())
    }

    async fn measure_cm(&mut self) -> Result<f32> {
        let mm = self.measure_mm().await?;
        Ok(f32::from(mm) / 10.0)
    }
}
