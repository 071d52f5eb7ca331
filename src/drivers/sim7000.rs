//! # SIM7000 Driver
//!
//! Modem and GNSS capabilities for SIMCom SIM7000-series modules over AT
//! commands.
//!
//! The modem and its GNSS receiver share one UART. [`Sim7000::gnss`] hands
//! out a [`Sim7000Gnss`] holding the same [`AtChannel`]; every command takes
//! the channel lock for its full request/response exchange.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

use super::at::{response_fields, unquote, AtChannel};
use crate::error::{NodeError, Result};
use crate::hal::modem::SIGNAL_QUALITY_UNKNOWN;
use crate::hal::{LocationFix, Locator, Modem, ModemStatus, SimStatus};
use crate::serial::SerialPortIO;

/// Handshake attempts before the modem is declared unresponsive
const HANDSHAKE_ATTEMPTS: u32 = 10;

/// Per-attempt handshake timeout
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// PS attach and PDP activation can take this long on a cold network
const ATTACH_TIMEOUT: Duration = Duration::from_secs(75);

type SharedChannel<P> = Arc<Mutex<AtChannel<P>>>;

/// SIM7000 modem
pub struct Sim7000<P> {
    at: SharedChannel<P>,
    status: ModemStatus,
    init_delay: Duration,
}

impl<P> std::fmt::Debug for Sim7000<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sim7000")
            .field("status", &self.status)
            .field("init_delay", &self.init_delay)
            .finish_non_exhaustive()
    }
}

impl<P: SerialPortIO> Sim7000<P> {
    /// Wraps an AT channel; the modem starts `Off` until [`Modem::init`]
    pub fn new(channel: AtChannel<P>) -> Self {
        Self {
            at: Arc::new(Mutex::new(channel)),
            status: ModemStatus::Off,
            init_delay: Duration::from_secs(3),
        }
    }

    /// Boot settle time before the first handshake
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    /// GNSS receiver sharing this modem's AT channel
    pub fn gnss(&self) -> Sim7000Gnss<P> {
        Sim7000Gnss {
            at: Arc::clone(&self.at),
            enabled: false,
        }
    }

    async fn command(&self, cmd: &str) -> Result<Vec<String>> {
        self.at.lock().await.command(cmd).await
    }

    async fn handshake(&mut self) -> Result<()> {
        self.status = ModemStatus::Initializing;
        sleep(self.init_delay).await;

        let mut at = self.at.lock().await;
        let mut responding = false;
        for attempt in 1..=HANDSHAKE_ATTEMPTS {
            if at.command_with_timeout("AT", HANDSHAKE_TIMEOUT).await.is_ok() {
                responding = true;
                break;
            }
            debug!("Modem handshake attempt {} failed", attempt);
        }

        if !responding {
            self.status = ModemStatus::Error;
            return Err(NodeError::Modem("no response to AT".to_string()));
        }

        if let Err(e) = at.command("ATE0").await {
            self.status = ModemStatus::Error;
            return Err(e);
        }

        self.status = ModemStatus::Ready;
        Ok(())
    }
}

#[async_trait]
impl<P: SerialPortIO> Modem for Sim7000<P> {
    async fn init(&mut self) -> Result<()> {
        info!("Initializing SIM7000...");
        self.handshake().await?;
        info!("SIM7000 ready");
        Ok(())
    }

    fn status(&self) -> ModemStatus {
        self.status
    }

    async fn restart(&mut self) -> Result<()> {
        info!("Restarting SIM7000...");
        // The module resets before answering, a missing OK is expected
        if let Err(e) = self.command("AT+CFUN=1,1").await {
            debug!("CFUN reset: {}", e);
        }
        self.handshake().await
    }

    async fn sleep(&mut self) -> Result<()> {
        self.command("AT+CSCLK=1").await.map(|_| ())
    }

    async fn wake(&mut self) -> Result<()> {
        self.command("AT+CSCLK=0").await.map(|_| ())
    }

    async fn info(&mut self) -> Result<String> {
        Ok(self.command("ATI").await?.join(" "))
    }

    async fn sim_status(&mut self) -> Result<SimStatus> {
        match self.command("AT+CPIN?").await {
            Ok(lines) => Ok(parse_cpin(&lines)),
            Err(NodeError::Modem(e)) => {
                debug!("SIM query failed: {}", e);
                Ok(SimStatus::Error)
            }
            Err(e) => Err(e),
        }
    }

    async fn unlock_sim(&mut self, pin: &str) -> Result<()> {
        self.command(&format!("AT+CPIN=\"{}\"", pin)).await.map(|_| ())
    }

    async fn is_network_registered(&mut self) -> bool {
        let mut at = self.at.lock().await;
        for (cmd, tag) in [("AT+CEREG?", "+CEREG"), ("AT+CREG?", "+CREG")] {
            match at.command(cmd).await {
                Ok(lines) if parse_registration(&lines, tag) => return true,
                Ok(_) => {}
                Err(e) => debug!("{} failed: {}", cmd, e),
            }
        }
        false
    }

    async fn attach_bearer(&mut self, apn: &str, user: &str, pass: &str) -> Result<()> {
        let mut at = self.at.lock().await;

        if let Ok(lines) = at.command("AT+CNACT?").await {
            if parse_cnact(&lines).is_some() {
                debug!("Bearer already active");
                return Ok(());
            }
        }

        at.command(&format!("AT+CGDCONT=1,\"IP\",\"{}\"", apn)).await?;
        if !user.is_empty() {
            // SIMCom firmware takes the password before the user name
            at.command(&format!("AT+CGAUTH=1,3,\"{}\",\"{}\"", pass, user))
                .await?;
        }
        at.command_with_timeout("AT+CGATT=1", ATTACH_TIMEOUT).await?;
        at.command_with_timeout(&format!("AT+CNACT=1,\"{}\"", apn), ATTACH_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn detach_bearer(&mut self) -> Result<()> {
        self.command("AT+CNACT=0").await.map(|_| ())
    }

    async fn is_bearer_attached(&mut self) -> bool {
        match self.command("AT+CNACT?").await {
            Ok(lines) => parse_cnact(&lines).is_some(),
            Err(e) => {
                debug!("Bearer query failed: {}", e);
                false
            }
        }
    }

    async fn operator_name(&mut self) -> String {
        match self.command("AT+COPS?").await {
            Ok(lines) => response_fields(&lines, "+COPS")
                .and_then(|f| f.get(2).map(|name| unquote(name).to_string()))
                .unwrap_or_default(),
            Err(_) => String::new(),
        }
    }

    async fn signal_quality(&mut self) -> i32 {
        match self.command("AT+CSQ").await {
            Ok(lines) => parse_csq(&lines),
            Err(_) => SIGNAL_QUALITY_UNKNOWN,
        }
    }

    async fn local_ip(&mut self) -> String {
        match self.command("AT+CNACT?").await {
            Ok(lines) => parse_cnact(&lines).unwrap_or_default(),
            Err(_) => String::new(),
        }
    }
}

/// GNSS receiver of a SIM7000
pub struct Sim7000Gnss<P> {
    at: SharedChannel<P>,
    enabled: bool,
}

#[async_trait]
impl<P: SerialPortIO> Locator for Sim7000Gnss<P> {
    async fn enable(&mut self) -> Result<()> {
        self.at.lock().await.command("AT+CGNSPWR=1").await?;
        self.enabled = true;
        info!("GNSS powered on");
        Ok(())
    }

    async fn disable(&mut self) -> Result<()> {
        self.at.lock().await.command("AT+CGNSPWR=0").await?;
        self.enabled = false;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn poll_fix(&mut self) -> Result<Option<LocationFix>> {
        let lines = self.at.lock().await.command("AT+CGNSINF").await?;
        Ok(lines
            .iter()
            .find_map(|line| line.strip_prefix("+CGNSINF:"))
            .and_then(parse_cgnsinf))
    }
}

fn parse_cpin(lines: &[String]) -> SimStatus {
    let Some(fields) = response_fields(lines, "+CPIN") else {
        return SimStatus::Error;
    };
    match fields.first().copied() {
        Some("READY") => SimStatus::Ready,
        Some("SIM PIN") | Some("SIM PUK") => SimStatus::Locked,
        Some("PH-SIM PIN") | Some("PH-NET PIN") => SimStatus::AntitheftLocked,
        _ => SimStatus::Error,
    }
}

/// `+CREG: <n>,<stat>`; registered when home (1) or roaming (5)
fn parse_registration(lines: &[String], tag: &str) -> bool {
    response_fields(lines, tag)
        .and_then(|f| f.get(1).and_then(|stat| stat.parse::<u8>().ok()))
        .map_or(false, |stat| stat == 1 || stat == 5)
}

/// `+CSQ: <rssi>,<ber>`; 99 when unknown
fn parse_csq(lines: &[String]) -> i32 {
    response_fields(lines, "+CSQ")
        .and_then(|f| f.first().and_then(|rssi| rssi.parse::<i32>().ok()))
        .filter(|rssi| (0..=31).contains(rssi))
        .unwrap_or(SIGNAL_QUALITY_UNKNOWN)
}

/// `+CNACT: <status>,"<ip>"`; the IP when the bearer is active
fn parse_cnact(lines: &[String]) -> Option<String> {
    let fields = response_fields(lines, "+CNACT")?;
    if fields.first().copied() != Some("1") {
        return None;
    }
    fields.get(1).map(|ip| unquote(ip).to_string())
}

/// Parses the `+CGNSINF` payload; `None` without a fix
///
/// Fields: run, fix, UTC, lat, lon, alt, speed, course, mode, -, HDOP, PDOP,
/// VDOP, -, sats in view, sats used, ...
fn parse_cgnsinf(payload: &str) -> Option<LocationFix> {
    let fields: Vec<&str> = payload.trim().split(',').map(str::trim).collect();
    if fields.len() < 16 || fields[1] != "1" {
        return None;
    }

    let number = |i: usize| fields[i].parse::<f64>().ok();
    let latitude = number(3)?;
    let longitude = number(4)?;
    let satellites = fields[15]
        .parse::<u8>()
        .or_else(|_| fields[14].parse::<u8>())
        .unwrap_or(0);

    Some(LocationFix {
        valid: true,
        latitude,
        longitude,
        altitude: number(5).unwrap_or(0.0) as f32,
        speed_kmh: number(6).unwrap_or(0.0) as f32,
        accuracy: number(10).unwrap_or(0.0) as f32,
        satellites,
        timestamp: Utc::now(),
    })
}
