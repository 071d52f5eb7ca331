//! # Battery Monitoring Capability
//!
//! Battery voltage and charge estimation.
//!
//! Two sources are provided:
//! - [`AdcBattery`]: reads the divided battery voltage in millivolts from a
//!   file (e.g. an IIO `in_voltageN_input` channel) and scales it back up
//! - [`SimulatedBattery`]: fixed level, used when the board has no battery
//!   sense line

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::{NodeError, Result};

/// Battery snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerStatus {
    pub valid: bool,
    pub voltage_mv: u32,
    /// Charge estimate, 0-100
    pub percentage: u8,
    pub timestamp: DateTime<Utc>,
}

/// Linear charge model between an empty and a full voltage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageRange {
    pub min_v: f32,
    pub max_v: f32,
}

impl VoltageRange {
    /// Maps a voltage onto 0-100, clamping outside the range
    pub fn percentage(&self, voltage_v: f32) -> u8 {
        if voltage_v <= self.min_v {
            return 0;
        }
        if voltage_v >= self.max_v {
            return 100;
        }
        (((voltage_v - self.min_v) / (self.max_v - self.min_v)) * 100.0) as u8
    }

    /// Inverse of [`VoltageRange::percentage`]
    pub fn voltage(&self, percentage: u8) -> f32 {
        self.min_v + (self.max_v - self.min_v) * f32::from(percentage.min(100)) / 100.0
    }
}

/// Battery monitoring operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PowerMonitor: Send {
    /// Prepares the monitor; failures are reported but not fatal to the node
    async fn init(&mut self) -> Result<()>;

    async fn battery_status(&mut self) -> PowerStatus;
}

/// Fixed battery level
#[derive(Debug, Clone)]
pub struct SimulatedBattery {
    level: u8,
    range: VoltageRange,
}

impl SimulatedBattery {
    pub fn new(level: u8, range: VoltageRange) -> Self {
        Self {
            level: level.min(100),
            range,
        }
    }

    pub fn set_level(&mut self, level: u8) {
        self.level = level.min(100);
    }
}

#[async_trait]
impl PowerMonitor for SimulatedBattery {
    async fn init(&mut self) -> Result<()> {
        info!("No battery sense configured, using simulated level {}%", self.level);
        Ok(())
    }

    async fn battery_status(&mut self) -> PowerStatus {
        let voltage = self.range.voltage(self.level);
        debug!("Simulated battery: {}% ({:.2}V)", self.level, voltage);
        PowerStatus {
            valid: true,
            voltage_mv: (voltage * 1000.0).round() as u32,
            percentage: self.level,
            timestamp: Utc::now(),
        }
    }
}

/// Battery voltage read from an ADC channel behind a resistor divider
#[derive(Debug, Clone)]
pub struct AdcBattery {
    path: PathBuf,
    divider: f32,
    range: VoltageRange,
}

impl AdcBattery {
    pub fn new(path: impl Into<PathBuf>, divider: f32, range: VoltageRange) -> Self {
        Self {
            path: path.into(),
            divider,
            range,
        }
    }

    async fn read_millivolts(&self) -> Result<u32> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let adc_mv: f32 = raw
            .trim()
            .parse()
            .map_err(|e| NodeError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        Ok((adc_mv * self.divider) as u32)
    }
}

#[async_trait]
impl PowerMonitor for AdcBattery {
    async fn init(&mut self) -> Result<()> {
        let mv = self.read_millivolts().await?;
        info!("Battery monitoring on {} ({} mV)", self.path.display(), mv);
        Ok(())
    }

    async fn battery_status(&mut self) -> PowerStatus {
        match self.read_millivolts().await {
            Ok(voltage_mv) => {
                let percentage = self.range.percentage(voltage_mv as f32 / 1000.0);
                debug!("Battery: {}% ({} mV)", percentage, voltage_mv);
                PowerStatus {
                    valid: true,
                    voltage_mv,
                    percentage,
                    timestamp: Utc::now(),
                }
            }
            Err(e) => {
                warn!("Battery read failed: {}", e);
                PowerStatus {
                    valid: false,
                    voltage_mv: 0,
                    percentage: 0,
                    timestamp: Utc::now(),
                }
            }
        }
    }
}
