//! # Modem Capability
//!
//! Abstraction over a cellular modem reachable through AT commands.
//!
//! The link layer only needs registration, bearer and signal queries. The
//! orchestrator additionally drives the power lifecycle (init, restart,
//! sleep, wake) and the SIM check performed at boot.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{NodeError, Result};

/// Signal quality reported when the modem cannot measure it
pub const SIGNAL_QUALITY_UNKNOWN: i32 = 99;

/// Modem power / handshake status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemStatus {
    Off,
    Initializing,
    Ready,
    Error,
}

/// SIM card status as reported by `AT+CPIN?`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStatus {
    /// No SIM, or the modem could not read it
    Error,
    Ready,
    /// PIN required
    Locked,
    /// PUK or network lock
    AntitheftLocked,
}

/// Cellular modem operations
#[async_trait]
pub trait Modem: Send {
    /// Powers the modem on and completes the command handshake
    async fn init(&mut self) -> Result<()>;

    /// Current power / handshake status
    fn status(&self) -> ModemStatus;

    /// Returns true once the handshake has completed
    fn is_ready(&self) -> bool {
        self.status() == ModemStatus::Ready
    }

    /// Power cycles the modem and repeats the handshake
    async fn restart(&mut self) -> Result<()>;

    async fn sleep(&mut self) -> Result<()>;

    async fn wake(&mut self) -> Result<()>;

    /// Human readable model / revision string
    async fn info(&mut self) -> Result<String>;

    async fn sim_status(&mut self) -> Result<SimStatus>;

    async fn unlock_sim(&mut self, pin: &str) -> Result<()>;

    /// Returns true if registered on the home network or roaming
    async fn is_network_registered(&mut self) -> bool;

    /// Attaches the packet data bearer on `apn`
    async fn attach_bearer(&mut self, apn: &str, user: &str, pass: &str) -> Result<()>;

    async fn detach_bearer(&mut self) -> Result<()>;

    async fn is_bearer_attached(&mut self) -> bool;

    /// Registered operator name, empty if unknown
    async fn operator_name(&mut self) -> String;

    /// Received signal quality: 0-31, or [`SIGNAL_QUALITY_UNKNOWN`]
    async fn signal_quality(&mut self) -> i32;

    /// Address assigned to the bearer, empty if none
    async fn local_ip(&mut self) -> String;
}

/// Verifies the SIM and unlocks it when a PIN is configured.
///
/// # Errors
///
/// - `SimLocked`: PIN required but none configured, or unlock rejected
/// - `SimError`: SIM missing, unreadable or anti-theft locked
pub async fn check_sim<M: Modem + ?Sized>(modem: &mut M, pin: &str) -> Result<()> {
    let status = modem.sim_status().await?;
    info!("SIM status: {:?}", status);

    match status {
        SimStatus::Ready => Ok(()),
        SimStatus::Locked if !pin.is_empty() => {
            info!("SIM locked, unlocking");
            modem.unlock_sim(pin).await.map_err(|e| {
                warn!("SIM unlock failed: {}", e);
                NodeError::SimLocked
            })?;
            info!("SIM unlocked");
            Ok(())
        }
        SimStatus::Locked => {
            warn!("SIM locked and no PIN configured (set modem.sim_pin)");
            Err(NodeError::SimLocked)
        }
        SimStatus::AntitheftLocked => Err(NodeError::SimError("anti-theft locked".to_string())),
        SimStatus::Error => Err(NodeError::SimError("not inserted or unreadable".to_string())),
    }
}
