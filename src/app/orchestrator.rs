//! # Telemetry Orchestrator
//!
//! Drives the node through its duty cycle, one state per [`tick`].
//!
//! ## State Machine
//!
//! ```text
//! Init --ok--> Idle --due--> ReadingSensors --> Publishing --> Idle
//!   |                                               |
//!   +--fail--> Error <------- modem lost -----------+
//!              Error --modem and bearer healthy--> Idle
//! ```
//!
//! Sensor failures never leave the cycle: they are carried as sentinels in
//! the published sample. A failed publish discards the sample; the next due
//! cycle reads fresh data. `Sleep` is reserved and never entered.
//!
//! [`tick`]: TelemetryOrchestrator::tick

use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{NodeError, Result};
use crate::hal::{
    check_sim, gnss, BlinkPattern, Coordinates, DistanceReading, LocationFix, Locator, Modem,
    PowerMonitor, PowerStatus, RangeFinder, StatusIndicator,
};
use crate::link::messaging::SessionTuning;
use crate::link::{BrokerSession, CellularLink, MessagingLink};
use crate::telemetry::{fill_level, TelemetrySample, TopicScheme};
use crate::timing;

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Init,
    Idle,
    ReadingSensors,
    Publishing,
    Error,
    /// Reserved for low-power support
    Sleep,
}

/// Sensor capabilities owned by the orchestrator
pub struct Peripherals {
    pub range_finder: RangeFinder,
    pub locator: Box<dyn Locator>,
    pub power: Box<dyn PowerMonitor>,
    pub status: Box<dyn StatusIndicator>,
}

/// Everything read in one `ReadingSensors` step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    pub distance: DistanceReading,
    /// -1 when the distance reading is invalid
    pub fill_level: i8,
    pub location: LocationFix,
    pub power: PowerStatus,
}

/// Top-level duty cycle
pub struct TelemetryOrchestrator<M, B> {
    config: Config,
    cellular: CellularLink<M>,
    messaging: MessagingLink<B>,
    peripherals: Peripherals,
    state: AppState,
    initialized: bool,
    first_cycle: bool,
    last_publish: Option<Instant>,
    last_idle_report: Instant,
    publish_interval: Duration,
    container_height_cm: f32,
    last_readings: Option<SensorSnapshot>,
    last_sample: Option<TelemetrySample>,
    cancel: CancellationToken,
}

impl<M: Modem, B: BrokerSession> TelemetryOrchestrator<M, B> {
    /// Wires both links from `config` around `modem` and `session`
    pub fn from_config(
        config: Config,
        modem: M,
        session: B,
        peripherals: Peripherals,
        cancel: CancellationToken,
    ) -> Self {
        let cellular = CellularLink::new(modem, cancel.clone())
            .with_registration_timeout(config.network_timeout());

        let messaging = MessagingLink::new(
            session,
            TopicScheme::new(&config.mqtt.topic_prefix, &config.mqtt.topic_suffix),
            config.reconnect_delay(),
        )
        .with_tuning(SessionTuning {
            buffer_size: config.mqtt.buffer_size,
            keep_alive: Duration::from_secs(config.mqtt.keep_alive_s),
            socket_timeout: Duration::from_secs(config.mqtt.socket_timeout_s),
            bind_device: config.cellular_interface().map(str::to_string),
        });

        Self::new(config, cellular, messaging, peripherals, cancel)
    }

    pub fn new(
        config: Config,
        cellular: CellularLink<M>,
        messaging: MessagingLink<B>,
        peripherals: Peripherals,
        cancel: CancellationToken,
    ) -> Self {
        let publish_interval = config.publish_interval();
        let container_height_cm = config.sensor.container_height_cm;
        Self {
            config,
            cellular,
            messaging,
            peripherals,
            state: AppState::Init,
            initialized: false,
            first_cycle: true,
            last_publish: None,
            last_idle_report: Instant::now(),
            publish_interval,
            container_height_cm,
            last_readings: None,
            last_sample: None,
            cancel,
        }
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    /// Readings from the most recent `ReadingSensors` step
    pub fn last_readings(&self) -> Option<&SensorSnapshot> {
        self.last_readings.as_ref()
    }

    /// Sample assembled by the most recent publish attempt
    pub fn last_sample(&self) -> Option<&TelemetrySample> {
        self.last_sample.as_ref()
    }

    /// Time of the last successful publish
    pub fn last_publish(&self) -> Option<Instant> {
        self.last_publish
    }

    /// Makes the next idle tick publish regardless of the interval
    pub fn force_publish(&mut self) {
        self.last_publish = None;
    }

    pub fn set_publish_interval(&mut self, interval: Duration) {
        info!("Publish interval set to {:?}", interval);
        self.publish_interval = interval;
    }

    pub fn set_container_height(&mut self, height_cm: f32) {
        if height_cm <= 0.0 {
            warn!("Ignoring container height {} cm", height_cm);
            return;
        }
        info!("Container height set to {} cm", height_cm);
        self.container_height_cm = height_cm;
    }

    pub fn cellular(&self) -> &CellularLink<M> {
        &self.cellular
    }

    pub fn messaging(&self) -> &MessagingLink<B> {
        &self.messaging
    }

    /// Mutable messaging access for subscriptions and handlers
    pub fn messaging_mut(&mut self) -> &mut MessagingLink<B> {
        &mut self.messaging
    }

    fn transition(&mut self, next: AppState) {
        if self.state != next {
            debug!("App {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn default_location(&self) -> Coordinates {
        Coordinates {
            latitude: self.config.gps.default_latitude,
            longitude: self.config.gps.default_longitude,
        }
    }

    /// Brings up hardware and both links.
    ///
    /// Distance sensor, power monitor and GNSS failures are logged and
    /// tolerated. Any other failure leaves the node in `Error` and is
    /// returned; [`NodeError::is_hardware_fault`] tells the caller whether
    /// the recovery loop can do anything about it.
    pub async fn init(&mut self) -> Result<()> {
        info!(
            "SmartWaste node {} firmware {} starting",
            self.config.device.id, self.config.device.firmware_version
        );
        self.transition(AppState::Init);

        if let Err(e) = self.init_hardware().await {
            error!("Hardware initialization failed: {}", e);
            self.transition(AppState::Error);
            return Err(e);
        }

        if let Err(e) = self.init_network().await {
            error!("Network initialization failed: {}", e);
            self.transition(AppState::Error);
            return Err(e);
        }

        self.initialized = true;
        self.first_cycle = true;
        self.last_publish = Some(Instant::now());
        self.transition(AppState::Idle);
        info!("Initialization complete");
        self.peripherals.status.show(BlinkPattern::InitOk).await;
        Ok(())
    }

    async fn init_hardware(&mut self) -> Result<()> {
        info!("Initializing hardware...");

        let modem = self.cellular.modem_mut();
        modem.init().await.map_err(modem_fault)?;
        check_sim(modem, &self.config.modem.sim_pin)
            .await
            .map_err(modem_fault)?;
        match modem.info().await {
            Ok(info) => info!("Modem: {}", info),
            Err(e) => debug!("Modem info unavailable: {}", e),
        }

        if let Err(e) = self.peripherals.range_finder.init().await {
            warn!("Distance sensor init failed, readings will be invalid: {}", e);
        }

        if let Err(e) = self.peripherals.power.init().await {
            warn!("Power monitor init failed: {}", e);
        }

        Ok(())
    }

    async fn init_network(&mut self) -> Result<()> {
        info!("Initializing network...");

        self.configure_links();
        self.cellular.connect(self.config.network_timeout()).await?;
        self.enable_location().await;
        self.messaging.connect(&mut self.cellular).await?;
        Ok(())
    }

    fn configure_links(&mut self) {
        let cellular = &self.config.cellular;
        self.cellular.initialize(&cellular.apn, &cellular.user, &cellular.pass);

        let mqtt = &self.config.mqtt;
        self.messaging.initialize(
            &mqtt.broker,
            mqtt.port,
            self.config.client_id(),
            &mqtt.user,
            &mqtt.pass,
        );
    }

    async fn enable_location(&mut self) {
        if self.config.gps.enabled {
            if let Err(e) = self.peripherals.locator.enable().await {
                warn!("GNSS enable failed, using default location: {}", e);
            }
        } else {
            let default = self.default_location();
            info!(
                "GNSS disabled, using fixed location {:.6}, {:.6}",
                default.latitude, default.longitude
            );
        }
    }

    /// Runs one step of the duty cycle and returns the resulting state.
    ///
    /// Inbound broker traffic is serviced at the start of every tick. A tick
    /// may block for a full registration, GNSS or recovery timeout.
    pub async fn tick(&mut self) -> AppState {
        if self.state == AppState::Init {
            debug!("Tick before initialization, ignoring");
            return self.state;
        }

        self.messaging.process_pending().await;

        match self.state {
            AppState::Idle => {
                self.report_idle();
                if self.should_publish() {
                    info!("Publish due, reading sensors");
                    self.transition(AppState::ReadingSensors);
                }
            }
            AppState::ReadingSensors => {
                let snapshot = self.read_sensors().await;
                self.last_readings = Some(snapshot);
                self.transition(AppState::Publishing);
            }
            AppState::Publishing => self.publish().await,
            AppState::Error => self.handle_error().await,
            AppState::Init | AppState::Sleep => {}
        }

        self.state
    }

    fn should_publish(&self) -> bool {
        if self.first_cycle {
            return true;
        }
        match self.last_publish {
            Some(at) => at.elapsed() >= self.publish_interval,
            None => true,
        }
    }

    fn report_idle(&mut self) {
        let every = Duration::from_millis(self.config.timing.idle_report_interval_ms);
        if self.last_idle_report.elapsed() < every {
            return;
        }
        self.last_idle_report = Instant::now();

        let remaining = self
            .last_publish
            .map(|at| self.publish_interval.saturating_sub(at.elapsed()))
            .unwrap_or_default();
        info!("Idle, next publish in {} s", remaining.as_secs());
    }

    async fn read_sensors(&mut self) -> SensorSnapshot {
        let distance = self
            .peripherals
            .range_finder
            .read_averaged(self.config.sensor.samples)
            .await;
        let fill = fill_level(distance.distance_cm, self.container_height_cm);
        if distance.valid {
            info!("Distance {:.2} cm, {}% full", distance.distance_cm, fill);
        } else {
            warn!("Distance sensor failed, reporting fill level {}", fill);
        }

        let default = self.default_location();
        let location = if self.config.gps.enabled {
            gnss::locate(
                self.peripherals.locator.as_mut(),
                self.config.gps_timeout(),
                default,
                &self.cancel,
            )
            .await
        } else {
            LocationFix::fallback(default)
        };

        let power = self.peripherals.power.battery_status().await;

        info!(
            "Readings: fill {}%, location {:.6}, {:.6} ({}), battery {}%",
            fill,
            location.latitude,
            location.longitude,
            if location.valid { "gnss" } else { "default" },
            power.percentage
        );

        SensorSnapshot {
            distance,
            fill_level: fill,
            location,
            power,
        }
    }

    async fn publish(&mut self) {
        match self.try_publish().await {
            Ok(()) => {
                self.last_publish = Some(Instant::now());
                self.first_cycle = false;
                info!("Publish successful");
                self.peripherals.status.show(BlinkPattern::PublishOk).await;
                self.transition(AppState::Idle);
            }
            Err(e) => {
                warn!("Publish failed, sample discarded: {}", e);
                self.peripherals.status.show(BlinkPattern::PublishFailed).await;
                if e.is_hardware_fault() {
                    self.transition(AppState::Error);
                } else {
                    self.transition(AppState::Idle);
                }
            }
        }
    }

    async fn try_publish(&mut self) -> Result<()> {
        self.cellular.ensure_connection().await?;
        self.messaging.ensure_connection(&mut self.cellular).await?;

        let readings = self.last_readings.ok_or(NodeError::SensorInvalid)?;
        let sample = TelemetrySample {
            device_id: self.config.device.id.clone(),
            latitude: readings.location.latitude,
            longitude: readings.location.longitude,
            battery_percentage: readings.power.percentage,
            fill_level_percent: readings.fill_level,
        };
        self.last_sample = Some(sample.clone());

        self.messaging.publish_telemetry(&sample, &mut self.cellular).await
    }

    async fn handle_error(&mut self) {
        warn!("Recovering from error state...");
        self.peripherals.status.show(BlinkPattern::Error).await;

        // Boot may have stopped before the links were configured
        if !self.initialized {
            self.configure_links();
        }

        let modem = self.cellular.modem_mut();
        let mut sim_ok = true;
        if !modem.is_ready() {
            info!("Attempting modem recovery...");
            match modem.restart().await {
                Ok(()) => {
                    if let Err(e) = check_sim(modem, &self.config.modem.sim_pin).await {
                        warn!("SIM not ready after restart: {}", e);
                        sim_ok = false;
                    }
                }
                Err(e) => warn!("Modem restart failed: {}", e),
            }
        } else if !self.initialized {
            if let Err(e) = check_sim(modem, &self.config.modem.sim_pin).await {
                warn!("SIM not ready: {}", e);
                sim_ok = false;
            }
        }

        if !sim_ok {
            let backoff = self.config.recovery_backoff();
            warn!("Recovery incomplete, retrying in {:?}", backoff);
            timing::pause(backoff, &self.cancel).await;
            return;
        }

        if !self.cellular.is_connected().await {
            info!("Attempting network recovery...");
            if let Err(e) = self.cellular.connect(self.config.network_timeout()).await {
                warn!("Network recovery failed: {}", e);
            }
        }

        if !self.messaging.is_connected() {
            info!("Attempting MQTT recovery...");
            if let Err(e) = self.messaging.connect(&mut self.cellular).await {
                warn!("MQTT recovery failed: {}", e);
            }
        }

        if self.cellular.modem().is_ready() && self.cellular.is_connected().await {
            info!("Recovery successful");
            if !self.initialized {
                self.enable_location().await;
                self.initialized = true;
                self.first_cycle = true;
                self.last_publish = Some(Instant::now());
            }
            self.transition(AppState::Idle);
        } else {
            let backoff = self.config.recovery_backoff();
            warn!("Recovery incomplete, retrying in {:?}", backoff);
            timing::pause(backoff, &self.cancel).await;
        }
    }

    /// Closes the broker session, detaches the bearer and stops GNSS
    pub async fn shutdown(&mut self) {
        info!("Shutting down links");
        self.messaging.disconnect().await;
        self.cellular.disconnect().await;
        if self.peripherals.locator.is_enabled() {
            if let Err(e) = self.peripherals.locator.disable().await {
                debug!("GNSS disable failed: {}", e);
            }
        }
    }
}

/// Any modem-stage failure at boot is a hardware fault, whatever layer raised it
fn modem_fault(e: NodeError) -> NodeError {
    if e.is_hardware_fault() {
        e
    } else {
        NodeError::Modem(e.to_string())
    }
}
