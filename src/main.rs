//! # SmartWaste Node
//!
//! Field telemetry node for waste containers.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration and set up logging
//!    - Open the modem and sensor UARTs and build the peripherals
//!    - Bring up the modem, SIM, cellular bearer and MQTT session
//!
//! 2. **Main Loop**
//!    - Tick the orchestrator until Ctrl+C
//!
//! 3. **Graceful Shutdown**
//!    - Cancel pending waits, disconnect MQTT and the bearer, power down GNSS
//!
//! # Examples
//!
//! ```bash
//! smartwaste-node --config config/default.toml
//! RUST_LOG=smartwaste_node=debug smartwaste-node
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use smartwaste_node::app::{AppState, Peripherals, TelemetryOrchestrator};
use smartwaste_node::config::{Config, LoggingConfig, PowerConfig, StatusConfig};
use smartwaste_node::drivers::{AtChannel, Sim7000, Us100};
use smartwaste_node::hal::power::{AdcBattery, SimulatedBattery, VoltageRange};
use smartwaste_node::hal::status::{LogIndicator, SysfsLed};
use smartwaste_node::hal::{PowerMonitor, RangeFinder, StatusIndicator};
use smartwaste_node::link::MqttSession;
use smartwaste_node::serial::{open_port, US100_BAUD_RATE};
use smartwaste_node::timing;

/// Fill-level telemetry node
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "SMARTWASTE_CONFIG", default_value = "config/default.toml")]
    config: PathBuf,

    /// Log every AT command and response at info level
    #[arg(long)]
    dump_at: bool,
}

/// Installs the stdout subscriber and, with `log_dir` set, a daily rolling file
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "smartwaste-node.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

fn build_power(power: &PowerConfig) -> Box<dyn PowerMonitor> {
    let range = VoltageRange {
        min_v: power.min_voltage,
        max_v: power.max_voltage,
    };
    match &power.adc_path {
        Some(path) => Box::new(AdcBattery::new(path, power.voltage_divider, range)),
        None => Box::new(SimulatedBattery::new(power.simulated_level, range)),
    }
}

fn build_status(status: &StatusConfig) -> Box<dyn StatusIndicator> {
    match &status.led_path {
        Some(path) => Box::new(SysfsLed::new(path)),
        None => Box::new(LogIndicator),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let _log_guard = init_logging(&config.logging);

    info!(
        "SmartWaste node v{} starting (device {}, firmware {})",
        env!("CARGO_PKG_VERSION"),
        config.device.id,
        config.device.firmware_version
    );

    let modem_port = open_port(&config.modem.port, config.modem.baud_rate)?;
    let channel = AtChannel::new(
        modem_port,
        Duration::from_millis(config.modem.command_timeout_ms),
    )
    .with_dump(cli.dump_at || config.logging.dump_at_commands);
    let modem = Sim7000::new(channel)
        .with_init_delay(Duration::from_millis(config.modem.init_delay_ms));

    let sensor_port = open_port(&config.sensor.port, US100_BAUD_RATE)?;
    let sensor = Us100::new(sensor_port, Duration::from_millis(config.sensor.timeout_ms));

    let peripherals = Peripherals {
        range_finder: RangeFinder::new(
            Box::new(sensor),
            config.sensor.min_distance_cm,
            config.sensor.max_distance_cm,
        ),
        locator: Box::new(modem.gnss()),
        power: build_power(&config.power),
        status: build_status(&config.status),
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            shutdown.cancel();
        }
    });

    let tick_delay = Duration::from_millis(config.timing.tick_delay_ms);
    let mut node = TelemetryOrchestrator::from_config(
        config,
        modem,
        MqttSession::new(),
        peripherals,
        cancel.clone(),
    );

    if let Err(e) = node.init().await {
        if e.is_hardware_fault() {
            error!("Fatal hardware error during init: {}", e);
            return Err(e.into());
        }
        warn!("Init incomplete ({}), entering recovery", e);
    }

    let mut last_state = node.state();
    loop {
        tokio::select! {
            state = node.tick() => {
                if state != last_state {
                    info!("State: {:?} -> {:?}", last_state, state);
                    last_state = state;
                }
                if state == AppState::Error {
                    warn!("Node in error state, recovering");
                }
            }
            _ = cancel.cancelled() => break,
        }

        if !timing::pause(tick_delay, &cancel).await {
            break;
        }
    }

    node.shutdown().await;
    info!("SmartWaste node stopped");
    Ok(())
}
