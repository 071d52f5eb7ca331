//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field has a default matching the reference deployment, so a file
//! only needs the sections it overrides. Sections must still be present.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::time::Duration;

use crate::error::{NodeError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub device: DeviceConfig,
    pub modem: ModemConfig,
    pub cellular: CellularConfig,
    pub mqtt: MqttConfig,
    pub sensor: SensorConfig,
    pub gps: GpsConfig,
    pub power: PowerConfig,
    pub timing: TimingConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device identity
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_device_id")]
    pub id: String,

    #[serde(default = "default_firmware_version")]
    pub firmware_version: String,
}

/// Modem serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ModemConfig {
    #[serde(default = "default_modem_port")]
    pub port: String,

    #[serde(default = "default_modem_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    #[serde(default = "default_modem_init_delay_ms")]
    pub init_delay_ms: u64,

    #[serde(default)]
    pub sim_pin: String,
}

/// Cellular bearer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CellularConfig {
    #[serde(default = "default_apn")]
    pub apn: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub pass: String,

    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,

    /// Host interface carried by the bearer (e.g. "ppp0"); MQTT is pinned to it
    #[serde(default)]
    pub interface: String,
}

/// MQTT broker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    #[serde(default = "default_broker")]
    pub broker: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Falls back to the device id when empty
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub pass: String,

    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    #[serde(default = "default_topic_suffix")]
    pub topic_suffix: String,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_keep_alive_s")]
    pub keep_alive_s: u64,

    #[serde(default = "default_socket_timeout_s")]
    pub socket_timeout_s: u64,
}

/// Ultrasonic sensor configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    #[serde(default = "default_sensor_port")]
    pub port: String,

    #[serde(default = "default_container_height_cm")]
    pub container_height_cm: f32,

    #[serde(default = "default_min_distance_cm")]
    pub min_distance_cm: f32,

    #[serde(default = "default_max_distance_cm")]
    pub max_distance_cm: f32,

    #[serde(default = "default_sensor_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_samples")]
    pub samples: u8,
}

/// GNSS configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GpsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_gps_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_latitude")]
    pub default_latitude: f64,

    #[serde(default = "default_longitude")]
    pub default_longitude: f64,
}

/// Battery monitoring configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PowerConfig {
    /// File reporting the divided battery voltage in millivolts; simulated level when unset
    #[serde(default)]
    pub adc_path: Option<PathBuf>,

    #[serde(default = "default_voltage_divider")]
    pub voltage_divider: f32,

    #[serde(default = "default_min_voltage")]
    pub min_voltage: f32,

    #[serde(default = "default_max_voltage")]
    pub max_voltage: f32,

    #[serde(default = "default_simulated_level")]
    pub simulated_level: u8,
}

/// Control loop timing
#[derive(Debug, Deserialize, Clone)]
pub struct TimingConfig {
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,

    #[serde(default = "default_recovery_backoff_ms")]
    pub recovery_backoff_ms: u64,

    #[serde(default = "default_idle_report_interval_ms")]
    pub idle_report_interval_ms: u64,

    #[serde(default = "default_tick_delay_ms")]
    pub tick_delay_ms: u64,
}

/// Status LED configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StatusConfig {
    /// sysfs LED directory; log-only indicator when unset
    #[serde(default)]
    pub led_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub dump_at_commands: bool,
}

// Default value functions
fn default_device_id() -> String { "smartwaste_001".to_string() }
fn default_firmware_version() -> String { "1.0.0".to_string() }

fn default_modem_port() -> String { "/dev/ttyUSB2".to_string() }
fn default_modem_baud_rate() -> u32 { 115200 }
fn default_command_timeout_ms() -> u64 { 1000 }
fn default_modem_init_delay_ms() -> u64 { 3000 }

fn default_apn() -> String { "jawalnet.com.sa".to_string() }
fn default_network_timeout_ms() -> u64 { 180000 }

fn default_broker() -> String { "test.mosquitto.org".to_string() }
fn default_mqtt_port() -> u16 { 1883 }
fn default_topic_prefix() -> String { "smartwaste".to_string() }
fn default_topic_suffix() -> String { "data".to_string() }
fn default_reconnect_delay_ms() -> u64 { 10000 }
fn default_buffer_size() -> usize { 512 }
fn default_keep_alive_s() -> u64 { 60 }
fn default_socket_timeout_s() -> u64 { 30 }

fn default_sensor_port() -> String { "/dev/ttyS0".to_string() }
fn default_container_height_cm() -> f32 { 120.0 }
fn default_min_distance_cm() -> f32 { 2.0 }
fn default_max_distance_cm() -> f32 { 400.0 }
fn default_sensor_timeout_ms() -> u64 { 30 }
fn default_samples() -> u8 { 5 }

fn default_gps_timeout_ms() -> u64 { 30000 }
fn default_latitude() -> f64 { 24.7136 }
fn default_longitude() -> f64 { 46.6753 }

fn default_voltage_divider() -> f32 { 2.0 }
fn default_min_voltage() -> f32 { 3.3 }
fn default_max_voltage() -> f32 { 4.2 }
fn default_simulated_level() -> u8 { 100 }

fn default_publish_interval_ms() -> u64 { 1000 }
fn default_recovery_backoff_ms() -> u64 { 10000 }
fn default_idle_report_interval_ms() -> u64 { 10000 }
fn default_tick_delay_ms() -> u64 { 10 }

fn invalid(msg: impl std::fmt::Display) -> NodeError {
    NodeError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use smartwaste_node::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// MQTT client id, falling back to the device id
    pub fn client_id(&self) -> &str {
        if self.mqtt.client_id.is_empty() {
            &self.device.id
        } else {
            &self.mqtt.client_id
        }
    }

    /// Interface the broker socket is bound to, `None` for the default route
    pub fn cellular_interface(&self) -> Option<&str> {
        Some(self.cellular.interface.as_str()).filter(|name| !name.is_empty())
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.cellular.network_timeout_ms)
    }

    pub fn gps_timeout(&self) -> Duration {
        Duration::from_millis(self.gps.timeout_ms)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.timing.publish_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.mqtt.reconnect_delay_ms)
    }

    pub fn recovery_backoff(&self) -> Duration {
        Duration::from_millis(self.timing.recovery_backoff_ms)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.device.id.is_empty() {
            return Err(invalid("device id cannot be empty"));
        }

        if self.modem.port.is_empty() {
            return Err(invalid("modem port cannot be empty"));
        }

        if ![9600, 19200, 38400, 57600, 115200].contains(&self.modem.baud_rate) {
            return Err(invalid("modem baud_rate must be one of: 9600, 19200, 38400, 57600, 115200"));
        }

        if self.modem.command_timeout_ms == 0 || self.modem.command_timeout_ms > 60000 {
            return Err(invalid("command_timeout_ms must be between 1 and 60000"));
        }

        if self.cellular.apn.is_empty() {
            return Err(invalid("cellular apn cannot be empty"));
        }

        if self.cellular.network_timeout_ms == 0 {
            return Err(invalid("network_timeout_ms must be greater than 0"));
        }

        if self.mqtt.broker.is_empty() {
            return Err(invalid("mqtt broker cannot be empty"));
        }

        if self.mqtt.port == 0 {
            return Err(invalid("mqtt port must be greater than 0"));
        }

        if self.mqtt.topic_prefix.is_empty() || self.mqtt.topic_suffix.is_empty() {
            return Err(invalid("mqtt topic prefix and suffix cannot be empty"));
        }

        // Topic levels are joined with '/', wildcards are not publishable
        for (name, value) in [
            ("topic_prefix", &self.mqtt.topic_prefix),
            ("topic_suffix", &self.mqtt.topic_suffix),
            ("device id", &self.device.id),
        ] {
            if value.contains(['#', '+']) {
                return Err(invalid(format!("{} cannot contain MQTT wildcards", name)));
            }
        }

        if self.mqtt.buffer_size < 128 {
            return Err(invalid("mqtt buffer_size must be at least 128 bytes"));
        }

        if self.mqtt.keep_alive_s < 5 || self.mqtt.keep_alive_s > 3600 {
            return Err(invalid("keep_alive_s must be between 5 and 3600"));
        }

        if self.mqtt.socket_timeout_s == 0 || self.mqtt.socket_timeout_s > 300 {
            return Err(invalid("socket_timeout_s must be between 1 and 300"));
        }

        if self.sensor.port.is_empty() {
            return Err(invalid("sensor port cannot be empty"));
        }

        if self.sensor.container_height_cm <= 0.0 {
            return Err(invalid("container_height_cm must be greater than 0"));
        }

        if self.sensor.min_distance_cm < 0.0
            || self.sensor.min_distance_cm >= self.sensor.max_distance_cm
        {
            return Err(invalid("min_distance_cm must be non-negative and below max_distance_cm"));
        }

        if self.sensor.timeout_ms == 0 || self.sensor.timeout_ms > 1000 {
            return Err(invalid("sensor timeout_ms must be between 1 and 1000"));
        }

        if self.sensor.samples == 0 || self.sensor.samples > 20 {
            return Err(invalid("sensor samples must be between 1 and 20"));
        }

        if self.gps.enabled && self.gps.timeout_ms == 0 {
            return Err(invalid("gps timeout_ms must be greater than 0 when enabled"));
        }

        if !(-90.0..=90.0).contains(&self.gps.default_latitude) {
            return Err(invalid("default_latitude must be between -90 and 90"));
        }

        if !(-180.0..=180.0).contains(&self.gps.default_longitude) {
            return Err(invalid("default_longitude must be between -180 and 180"));
        }

        if self.power.voltage_divider <= 0.0 {
            return Err(invalid("voltage_divider must be greater than 0"));
        }

        if self.power.min_voltage >= self.power.max_voltage {
            return Err(invalid("min_voltage must be less than max_voltage"));
        }

        if self.power.simulated_level > 100 {
            return Err(invalid("simulated_level must be between 0 and 100"));
        }

        if self.timing.publish_interval_ms == 0 {
            return Err(invalid("publish_interval_ms must be greater than 0"));
        }

        if self.timing.recovery_backoff_ms == 0 || self.timing.recovery_backoff_ms > 600000 {
            return Err(invalid("recovery_backoff_ms must be between 1 and 600000"));
        }

        if self.timing.tick_delay_ms > 10000 {
            return Err(invalid("tick_delay_ms must be at most 10000"));
        }

        Ok(())
    }
}
