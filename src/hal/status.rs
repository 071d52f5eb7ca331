//! # Status Indicator
//!
//! Coarse outcome signalling through a blinking LED.
//!
//! Patterns are output only; a failure to drive the LED is logged and
//! otherwise ignored.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::error::Result;

/// Blink patterns shown to a human observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkPattern {
    /// Initialization complete
    InitOk,
    /// Sample published
    PublishOk,
    /// Publish attempt abandoned or rejected
    PublishFailed,
    /// Node in error recovery
    Error,
}

impl BlinkPattern {
    /// (blinks, on time, off time)
    pub fn timing(self) -> (u32, Duration, Duration) {
        match self {
            BlinkPattern::InitOk => (3, Duration::from_millis(200), Duration::from_millis(200)),
            BlinkPattern::PublishOk => (1, Duration::from_millis(100), Duration::ZERO),
            BlinkPattern::PublishFailed => (5, Duration::from_millis(50), Duration::from_millis(50)),
            BlinkPattern::Error => (10, Duration::from_millis(50), Duration::from_millis(50)),
        }
    }
}

/// LED driver
#[async_trait]
pub trait StatusIndicator: Send {
    async fn set_led(&mut self, on: bool) -> Result<()>;

    /// Plays `pattern`, holding the caller for its full duration
    async fn show(&mut self, pattern: BlinkPattern) {
        let (times, on, off) = pattern.timing();
        for i in 0..times {
            if let Err(e) = self.set_led(true).await {
                warn!("Status LED unavailable: {}", e);
                return;
            }
            sleep(on).await;
            let _ = self.set_led(false).await;
            if i + 1 < times && !off.is_zero() {
                sleep(off).await;
            }
        }
    }
}

/// LED exposed through `/sys/class/leds/<name>`
#[derive(Debug, Clone)]
pub struct SysfsLed {
    brightness: PathBuf,
}

impl SysfsLed {
    /// `led_dir` is the LED's sysfs directory
    pub fn new(led_dir: impl Into<PathBuf>) -> Self {
        Self {
            brightness: led_dir.into().join("brightness"),
        }
    }
}

#[async_trait]
impl StatusIndicator for SysfsLed {
    async fn set_led(&mut self, on: bool) -> Result<()> {
        tokio::fs::write(&self.brightness, if on { "1" } else { "0" }).await?;
        Ok(())
    }
}

/// Indicator for boards without a usable LED; patterns are only logged
#[derive(Debug, Clone, Default)]
pub struct LogIndicator;

#[async_trait]
impl StatusIndicator for LogIndicator {
    async fn set_led(&mut self, _on: bool) -> Result<()> {
        Ok(())
    }

    async fn show(&mut self, pattern: BlinkPattern) {
        debug!("Status: {:?}", pattern);
    }
}
