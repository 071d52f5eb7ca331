//! # Cellular Link
//!
//! Brings up and supervises the cellular data bearer.
//!
//! ## State Machine
//!
//! ```text
//! Disconnected/Error --connect--> Connecting --ok--> Connected
//!                                    |
//!                                    +--fail--> Error
//! Connected --check fails--> Disconnected
//! ```
//!
//! `Error` is only left through an explicit [`CellularLink::connect`] or
//! [`CellularLink::ensure_connection`]; retry cadence belongs to the caller.

use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{LinkState, NetworkInfo};
use crate::error::{NodeError, Result};
use crate::hal::Modem;
use crate::timing::{Deadline, DEFAULT_POLL_INTERVAL};

/// Registration wait used by [`CellularLink::ensure_connection`] by default
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(180);

/// Cellular bearer supervisor
///
/// Owns the modem. Upper layers only observe the bearer through
/// [`CellularLink::is_connected`] and [`CellularLink::ensure_connection`].
pub struct CellularLink<M> {
    modem: M,
    state: LinkState,
    apn: String,
    user: String,
    pass: String,
    registration_timeout: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl<M> std::fmt::Debug for CellularLink<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellularLink")
            .field("state", &self.state)
            .field("apn", &self.apn)
            .finish_non_exhaustive()
    }
}

impl<M: Modem> CellularLink<M> {
    /// Creates a disconnected link over `modem`.
    ///
    /// `cancel` bounds every registration wait started by this link.
    pub fn new(modem: M, cancel: CancellationToken) -> Self {
        Self {
            modem,
            state: LinkState::Disconnected,
            apn: String::new(),
            user: String::new(),
            pass: String::new(),
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel,
        }
    }

    /// Registration wait applied when [`CellularLink::ensure_connection`]
    /// finds the modem unregistered
    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = timeout;
        self
    }

    /// Records bearer credentials. Never connects.
    pub fn initialize(&mut self, apn: &str, user: &str, pass: &str) {
        self.apn = apn.to_string();
        self.user = user.to_string();
        self.pass = pass.to_string();
        info!("Cellular link configured for APN {}", apn);
    }

    /// Cached state, without probing the modem
    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn modem(&self) -> &M {
        &self.modem
    }

    /// Modem access for power lifecycle operations (init, restart, SIM)
    pub fn modem_mut(&mut self) -> &mut M {
        &mut self.modem
    }

    fn transition(&mut self, next: LinkState) {
        if self.state != next {
            debug!("Cellular link {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn fail(&mut self, err: NodeError) -> Result<()> {
        warn!("Cellular link failed: {}", err);
        self.transition(LinkState::Error);
        Err(err)
    }

    /// Registers on the network and attaches the data bearer.
    ///
    /// # Errors
    ///
    /// - `ModemNotReady`: the modem has not completed its handshake
    /// - `RegistrationTimeout`: no registration within `timeout`
    /// - `BearerAttachFailed`: attach rejected or not verified afterwards
    pub async fn connect(&mut self, timeout: Duration) -> Result<()> {
        if !self.modem.is_ready() {
            return self.fail(NodeError::ModemNotReady);
        }

        self.transition(LinkState::Connecting);
        info!("Connecting to cellular network...");

        let cancel = self.cancel.clone();
        if !self.wait_for_network(timeout, &cancel).await {
            return self.fail(NodeError::RegistrationTimeout);
        }

        self.attach().await?;

        self.transition(LinkState::Connected);
        let info = self.network_info().await;
        info!(
            "Cellular link up: operator {}, signal {}, IP {}",
            info.operator_name, info.signal_quality, info.ip_address
        );
        Ok(())
    }

    async fn attach(&mut self) -> Result<()> {
        info!("Attaching bearer on APN {}", self.apn);

        if let Err(e) = self.modem.attach_bearer(&self.apn, &self.user, &self.pass).await {
            return self.fail(NodeError::BearerAttachFailed(e.to_string()));
        }

        if !self.modem.is_bearer_attached().await {
            return self.fail(NodeError::BearerAttachFailed(
                "bearer not attached after attach".to_string(),
            ));
        }

        Ok(())
    }

    /// Detaches the bearer. Always ends `Disconnected`.
    pub async fn disconnect(&mut self) {
        info!("Disconnecting cellular link");
        if let Err(e) = self.modem.detach_bearer().await {
            warn!("Bearer detach failed: {}", e);
        }
        self.transition(LinkState::Disconnected);
    }

    /// Checks the bearer.
    ///
    /// A cached `Connected` state that the modem no longer confirms is
    /// downgraded to `Disconnected`.
    pub async fn is_connected(&mut self) -> bool {
        if self.state != LinkState::Connected {
            return false;
        }

        let attached = self.modem.is_bearer_attached().await;
        if !attached {
            warn!("Cellular bearer dropped");
            self.transition(LinkState::Disconnected);
        }
        attached
    }

    /// Restores the bearer if it is down.
    ///
    /// Waits for registration (up to the configured registration timeout)
    /// when the modem is unregistered, then re-attaches. No-op when already
    /// connected. There is no cooldown at this layer.
    pub async fn ensure_connection(&mut self) -> Result<()> {
        if self.is_connected().await {
            return Ok(());
        }

        info!("Cellular link down, reconnecting...");

        if !self.modem.is_ready() {
            return self.fail(NodeError::ModemNotReady);
        }

        if !self.modem.is_network_registered().await {
            let cancel = self.cancel.clone();
            if !self.wait_for_network(self.registration_timeout, &cancel).await {
                return self.fail(NodeError::RegistrationTimeout);
            }
        }

        if !self.modem.is_bearer_attached().await {
            self.attach().await?;
        }

        self.transition(LinkState::Connected);
        info!("Cellular link restored");
        Ok(())
    }

    /// Polls registration until `timeout` elapses or `cancel` fires
    pub async fn wait_for_network(&mut self, timeout: Duration, cancel: &CancellationToken) -> bool {
        info!("Waiting for network registration...");

        let deadline = Deadline::after(timeout, self.poll_interval);
        loop {
            if self.modem.is_network_registered().await {
                info!("Network registered");
                return true;
            }
            if !deadline.tick(cancel).await {
                warn!("Network registration timed out");
                return false;
            }
        }
    }

    /// Fresh network snapshot; never cached
    pub async fn network_info(&mut self) -> NetworkInfo {
        NetworkInfo {
            registered: self.modem.is_network_registered().await,
            operator_name: self.modem.operator_name().await,
            signal_quality: self.modem.signal_quality().await,
            ip_address: self.modem.local_ip().await,
        }
    }

    pub async fn signal_quality(&mut self) -> i32 {
        self.modem.signal_quality().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mocks::FakeModem;
    use crate::hal::ModemStatus;
    use tokio::time::Instant;

    fn link(modem: &FakeModem) -> CellularLink<FakeModem> {
        let mut link = CellularLink::new(modem.clone(), CancellationToken::new())
            .with_registration_timeout(Duration::from_secs(20));
        link.initialize("jawalnet.com.sa", "", "");
        link
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_does_not_connect() {
        let modem = FakeModem::ready();
        let link = link(&modem);

        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(modem.state().attach_calls, 0);
        assert_eq!(modem.state().registration_polls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_success() {
        let modem = FakeModem::ready();
        let mut link = link(&modem);

        assert!(link.connect(Duration::from_secs(60)).await.is_ok());
        assert_eq!(link.state(), LinkState::Connected);
        assert!(link.is_connected().await);
        assert_eq!(modem.state().last_apn.as_deref(), Some("jawalnet.com.sa"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_modem_not_ready() {
        let modem = FakeModem::off();
        let mut link = link(&modem);

        let result = link.connect(Duration::from_secs(60)).await;
        assert!(matches!(result, Err(NodeError::ModemNotReady)));
        assert_eq!(link.state(), LinkState::Error);
        assert_eq!(modem.state().registration_polls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_registration_timeout() {
        let modem = FakeModem::ready();
        modem.state().registered = false;
        let mut link = link(&modem);
        let start = Instant::now();

        let result = link.connect(Duration::from_secs(10)).await;
        assert!(matches!(result, Err(NodeError::RegistrationTimeout)));
        assert_eq!(link.state(), LinkState::Error);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(modem.state().attach_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_waits_for_late_registration() {
        let modem = FakeModem::ready();
        modem.state().registered = false;
        modem.state().register_after_polls = Some(4);
        let mut link = link(&modem);

        assert!(link.connect(Duration::from_secs(10)).await.is_ok());
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_attach_rejected() {
        let modem = FakeModem::ready();
        modem.state().attach_ok = false;
        let mut link = link(&modem);

        let result = link.connect(Duration::from_secs(10)).await;
        assert!(matches!(result, Err(NodeError::BearerAttachFailed(_))));
        assert_eq!(link.state(), LinkState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_attach_not_verified() {
        let modem = FakeModem::ready();
        modem.state().attach_verifies = false;
        let mut link = link(&modem);

        let result = link.connect(Duration::from_secs(10)).await;
        assert!(matches!(result, Err(NodeError::BearerAttachFailed(_))));
        assert_eq!(link.state(), LinkState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_cancelled_wait() {
        let modem = FakeModem::ready();
        modem.state().registered = false;
        let cancel = CancellationToken::new();
        let mut link = CellularLink::new(modem.clone(), cancel.clone());
        cancel.cancel();

        let result = link.connect(Duration::from_secs(600)).await;
        assert!(matches!(result, Err(NodeError::RegistrationTimeout)));
        assert_eq!(modem.state().registration_polls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_always_ends_disconnected() {
        let modem = FakeModem::ready();
        let mut link = link(&modem);
        link.connect(Duration::from_secs(10)).await.unwrap();
        modem.state().detach_fails = true;

        link.disconnect().await;
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(modem.state().detach_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_connected_downgrades_on_silent_drop() {
        let modem = FakeModem::ready();
        let mut link = link(&modem);
        link.connect(Duration::from_secs(10)).await.unwrap();

        modem.state().bearer = false;
        assert!(!link.is_connected().await);
        assert_eq!(link.state(), LinkState::Disconnected);

        // Bearer coming back on its own does not resurrect the cached state
        modem.state().bearer = true;
        assert!(!link.is_connected().await);
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_connected_false_when_never_connected() {
        let modem = FakeModem::ready();
        modem.state().bearer = true;
        let mut link = link(&modem);
        assert!(!link.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_connection_noop_when_connected() {
        let modem = FakeModem::ready();
        let mut link = link(&modem);
        link.connect(Duration::from_secs(10)).await.unwrap();
        let attaches = modem.state().attach_calls;
        let polls = modem.state().registration_polls;

        assert!(link.ensure_connection().await.is_ok());
        assert_eq!(modem.state().attach_calls, attaches);
        assert_eq!(modem.state().registration_polls, polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_connection_reattaches_dropped_bearer() {
        let modem = FakeModem::ready();
        let mut link = link(&modem);
        link.connect(Duration::from_secs(10)).await.unwrap();
        modem.state().bearer = false;

        assert!(link.ensure_connection().await.is_ok());
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(modem.state().attach_calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_connection_recovers_from_error() {
        let modem = FakeModem::ready();
        modem.state().attach_ok = false;
        let mut link = link(&modem);
        assert!(link.connect(Duration::from_secs(10)).await.is_err());
        assert_eq!(link.state(), LinkState::Error);

        modem.state().attach_ok = true;
        assert!(link.ensure_connection().await.is_ok());
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_connection_blocks_for_registration_timeout() {
        let modem = FakeModem::ready();
        modem.state().registered = false;
        let mut link = link(&modem);
        let start = Instant::now();

        let result = link.ensure_connection().await;
        assert!(matches!(result, Err(NodeError::RegistrationTimeout)));
        assert_eq!(link.state(), LinkState::Error);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_connection_modem_not_ready() {
        let modem = FakeModem::ready();
        modem.state().status = ModemStatus::Error;
        let mut link = link(&modem);

        let result = link.ensure_connection().await;
        assert!(matches!(result, Err(NodeError::ModemNotReady)));
        assert_eq!(link.state(), LinkState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_info_snapshot() {
        let modem = FakeModem::ready();
        let mut link = link(&modem);
        link.connect(Duration::from_secs(10)).await.unwrap();

        let info = link.network_info().await;
        assert!(info.registered);
        assert_eq!(info.operator_name, "STC");
        assert_eq!(info.signal_quality, 21);
        assert_eq!(info.ip_address, "10.64.12.7");

        modem.state().signal = 99;
        assert_eq!(link.signal_quality().await, 99);
        assert_eq!(link.network_info().await.signal_quality, 99);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queries_do_not_change_state() {
        let modem = FakeModem::ready();
        let mut link = link(&modem);
        let cancel = CancellationToken::new();

        assert!(link.wait_for_network(Duration::from_secs(1), &cancel).await);
        link.network_info().await;
        link.signal_quality().await;
        assert_eq!(link.state(), LinkState::Disconnected);
    }
}
