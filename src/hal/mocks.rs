//! Hand-written capability fakes for testing
//!
//! Each fake keeps its state behind `Arc<Mutex<..>>` so a test can keep a
//! handle and flip conditions (registration, bearer, SIM) after the fake has
//! been moved into a link or the orchestrator.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::gnss::{LocationFix, Locator};
use super::modem::{Modem, ModemStatus, SimStatus};
use super::sensor::DistanceSensor;
use super::status::{BlinkPattern, StatusIndicator};
use crate::error::{NodeError, Result};

/// Scriptable modem state
#[derive(Debug)]
pub struct FakeModemState {
    pub status: ModemStatus,
    pub init_ok: bool,
    pub restart_ok: bool,
    pub restarts: u32,
    pub sleeping: bool,
    pub sim: SimStatus,
    /// `AT+CPIN?` fails at the serial layer
    pub sim_query_fails: bool,
    pub accepted_pin: Option<String>,
    pub unlock_attempts: Vec<String>,
    pub registered: bool,
    /// Registration flips to true once this many polls have been made
    pub register_after_polls: Option<u32>,
    pub registration_polls: u32,
    pub attach_ok: bool,
    /// Whether a successful attach actually brings the bearer up
    pub attach_verifies: bool,
    pub bearer: bool,
    pub attach_calls: u32,
    pub detach_calls: u32,
    pub detach_fails: bool,
    pub last_apn: Option<String>,
    pub operator: String,
    pub signal: i32,
    pub ip: String,
}

/// Modem fake with a shared, inspectable state
#[derive(Debug, Clone)]
pub struct FakeModem {
    state: Arc<Mutex<FakeModemState>>,
}

impl FakeModem {
    /// Powered, SIM ready, registered, attach succeeds; bearer not yet up
    pub fn ready() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeModemState {
                status: ModemStatus::Ready,
                init_ok: true,
                restart_ok: true,
                restarts: 0,
                sleeping: false,
                sim: SimStatus::Ready,
                sim_query_fails: false,
                accepted_pin: None,
                unlock_attempts: Vec::new(),
                registered: true,
                register_after_polls: None,
                registration_polls: 0,
                attach_ok: true,
                attach_verifies: true,
                bearer: false,
                attach_calls: 0,
                detach_calls: 0,
                detach_fails: false,
                last_apn: None,
                operator: "STC".to_string(),
                signal: 21,
                ip: "10.64.12.7".to_string(),
            })),
        }
    }

    /// Powered off; `init` brings it to Ready
    pub fn off() -> Self {
        let modem = Self::ready();
        modem.state().status = ModemStatus::Off;
        modem
    }

    pub fn state(&self) -> MutexGuard<'_, FakeModemState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Modem for FakeModem {
    async fn init(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.init_ok {
            state.status = ModemStatus::Ready;
            Ok(())
        } else {
            state.status = ModemStatus::Error;
            Err(NodeError::Modem("no response to AT".to_string()))
        }
    }

    fn status(&self) -> ModemStatus {
        self.state().status
    }

    async fn restart(&mut self) -> Result<()> {
        let mut state = self.state();
        state.restarts += 1;
        state.bearer = false;
        if state.restart_ok {
            state.status = ModemStatus::Ready;
            Ok(())
        } else {
            state.status = ModemStatus::Error;
            Err(NodeError::Modem("restart failed".to_string()))
        }
    }

    async fn sleep(&mut self) -> Result<()> {
        self.state().sleeping = true;
        Ok(())
    }

    async fn wake(&mut self) -> Result<()> {
        self.state().sleeping = false;
        Ok(())
    }

    async fn info(&mut self) -> Result<String> {
        Ok("SIMCOM SIM7000G R1529".to_string())
    }

    async fn sim_status(&mut self) -> Result<SimStatus> {
        let state = self.state();
        if state.sim_query_fails {
            return Err(NodeError::Serial("Failed to read: broken pipe".to_string()));
        }
        Ok(state.sim)
    }

    async fn unlock_sim(&mut self, pin: &str) -> Result<()> {
        let mut state = self.state();
        state.unlock_attempts.push(pin.to_string());
        if state.accepted_pin.as_deref() == Some(pin) {
            state.sim = SimStatus::Ready;
            Ok(())
        } else {
            Err(NodeError::Modem("+CME ERROR: incorrect password".to_string()))
        }
    }

    async fn is_network_registered(&mut self) -> bool {
        let mut state = self.state();
        state.registration_polls += 1;
        if let Some(after) = state.register_after_polls {
            if state.registration_polls >= after {
                state.registered = true;
            }
        }
        state.registered
    }

    async fn attach_bearer(&mut self, apn: &str, _user: &str, _pass: &str) -> Result<()> {
        let mut state = self.state();
        state.attach_calls += 1;
        state.last_apn = Some(apn.to_string());
        if !state.attach_ok {
            return Err(NodeError::Modem("+CME ERROR: 148".to_string()));
        }
        if state.attach_verifies {
            state.bearer = true;
        }
        Ok(())
    }

    async fn detach_bearer(&mut self) -> Result<()> {
        let mut state = self.state();
        state.detach_calls += 1;
        if state.detach_fails {
            return Err(NodeError::Modem("ERROR".to_string()));
        }
        state.bearer = false;
        Ok(())
    }

    async fn is_bearer_attached(&mut self) -> bool {
        self.state().bearer
    }

    async fn operator_name(&mut self) -> String {
        self.state().operator.clone()
    }

    async fn signal_quality(&mut self) -> i32 {
        self.state().signal
    }

    async fn local_ip(&mut self) -> String {
        let state = self.state();
        if state.bearer {
            state.ip.clone()
        } else {
            String::new()
        }
    }
}

/// Distance sensor replaying scripted samples; `None` is a failed sample
#[derive(Debug, Clone)]
pub struct FakeDistanceSensor {
    samples: Arc<Mutex<VecDeque<Option<f32>>>>,
    calls: Arc<Mutex<usize>>,
    pub init_ok: bool,
}

impl FakeDistanceSensor {
    pub fn new(samples: Vec<Option<f32>>) -> Self {
        Self {
            samples: Arc::new(Mutex::new(samples.into())),
            calls: Arc::new(Mutex::new(0)),
            init_ok: true,
        }
    }

    /// Sensor whose every measurement fails
    pub fn broken() -> Self {
        let mut sensor = Self::new(Vec::new());
        sensor.init_ok = false;
        sensor
    }

    pub fn calls(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.calls)
    }

    /// Appends samples for later reads
    pub fn push(&self, samples: &[Option<f32>]) {
        self.samples.lock().unwrap().extend(samples.iter().copied());
    }
}

#[async_trait]
impl DistanceSensor for FakeDistanceSensor {
    async fn init(&mut self) -> Result<()> {
        if self.init_ok {
            Ok(())
        } else {
            Err(NodeError::SensorInvalid)
        }
    }

    async fn measure_cm(&mut self) -> Result<f32> {
        *self.calls.lock().unwrap() += 1;
        match self.samples.lock().unwrap().pop_front() {
            Some(Some(distance)) => Ok(distance),
            _ => Err(NodeError::SensorInvalid),
        }
    }
}

/// GNSS receiver replaying scripted fixes; `None` means "no fix yet"
#[derive(Debug, Clone)]
pub struct FakeLocator {
    fixes: VecDeque<Option<(f64, f64)>>,
    enabled: bool,
    polls: Arc<Mutex<usize>>,
    pub enable_ok: bool,
}

impl FakeLocator {
    pub fn new(fixes: Vec<Option<(f64, f64)>>) -> Self {
        Self {
            fixes: fixes.into(),
            enabled: false,
            polls: Arc::new(Mutex::new(0)),
            enable_ok: true,
        }
    }

    pub fn polls(&self) -> usize {
        *self.polls.lock().unwrap()
    }

    pub fn poll_counter(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.polls)
    }
}

#[async_trait]
impl Locator for FakeLocator {
    async fn enable(&mut self) -> Result<()> {
        if !self.enable_ok {
            return Err(NodeError::Modem("+CGNSPWR failed".to_string()));
        }
        self.enabled = true;
        Ok(())
    }

    async fn disable(&mut self) -> Result<()> {
        self.enabled = false;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn poll_fix(&mut self) -> Result<Option<LocationFix>> {
        *self.polls.lock().unwrap() += 1;
        Ok(self.fixes.pop_front().flatten().map(|(latitude, longitude)| LocationFix {
            valid: true,
            latitude,
            longitude,
            altitude: 612.0,
            speed_kmh: 0.0,
            accuracy: 2.5,
            satellites: 9,
            timestamp: Utc::now(),
        }))
    }
}

/// Records every LED transition; uses the default blink timing
#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator {
    transitions: Arc<Mutex<Vec<bool>>>,
}

impl RecordingIndicator {
    pub fn transitions(&self) -> Vec<bool> {
        self.transitions.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusIndicator for RecordingIndicator {
    async fn set_led(&mut self, on: bool) -> Result<()> {
        self.transitions.lock().unwrap().push(on);
        Ok(())
    }
}

/// Records the patterns shown without blinking
#[derive(Debug, Clone, Default)]
pub struct PatternRecorder {
    patterns: Arc<Mutex<Vec<BlinkPattern>>>,
}

impl PatternRecorder {
    pub fn patterns(&self) -> Vec<BlinkPattern> {
        self.patterns.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusIndicator for PatternRecorder {
    async fn set_led(&mut self, _on: bool) -> Result<()> {
        Ok(())
    }

    async fn show(&mut self, pattern: BlinkPattern) {
        self.patterns.lock().unwrap().push(pattern);
    }
}
