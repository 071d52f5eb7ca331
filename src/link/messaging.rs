//! # Messaging Link
//!
//! Broker session management on top of the cellular bearer.
//!
//! The session is only opened while the [`CellularLink`] reports a live
//! bearer, and every operation that needs the broker re-verifies both layers
//! first. Reconnects are rate limited by a [`Cooldown`]: a link that is
//! already connected never consumes a cooldown slot.

use tokio::time::Duration;
use tracing::{debug, info, warn};

use super::session::{BrokerSession, Credentials, InboundMessage, SessionOptions};
use super::{CellularLink, LinkState};
use crate::error::{NodeError, Result};
use crate::hal::Modem;
use crate::telemetry::{TelemetrySample, TopicScheme};
use crate::timing::Cooldown;

/// Callback for messages arriving on subscribed topics
pub type MessageHandler = Box<dyn FnMut(&InboundMessage) + Send>;

/// Session parameters that do not come from `initialize`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTuning {
    pub buffer_size: usize,
    pub keep_alive: Duration,
    pub socket_timeout: Duration,
    /// Network interface of the cellular bearer; the broker socket is bound to it
    pub bind_device: Option<String>,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            buffer_size: 512,
            keep_alive: Duration::from_secs(60),
            socket_timeout: Duration::from_secs(30),
            bind_device: None,
        }
    }
}

/// Broker session supervisor
pub struct MessagingLink<B> {
    session: B,
    state: LinkState,
    topics: TopicScheme,
    tuning: SessionTuning,
    options: Option<SessionOptions>,
    credentials: Option<Credentials>,
    cooldown: Cooldown,
    handler: Option<MessageHandler>,
}

impl<B> std::fmt::Debug for MessagingLink<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingLink")
            .field("state", &self.state)
            .field("options", &self.options)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl<B: BrokerSession> MessagingLink<B> {
    /// Creates a disconnected link.
    ///
    /// `reconnect_delay` is the minimum spacing between reconnect attempts.
    pub fn new(session: B, topics: TopicScheme, reconnect_delay: Duration) -> Self {
        Self {
            session,
            state: LinkState::Disconnected,
            topics,
            tuning: SessionTuning::default(),
            options: None,
            credentials: None,
            cooldown: Cooldown::new(reconnect_delay),
            handler: None,
        }
    }

    pub fn with_tuning(mut self, tuning: SessionTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Configures the broker endpoint and identity. Must precede `connect`.
    ///
    /// Credentials are only sent when both `user` and `pass` are non-empty.
    pub fn initialize(&mut self, broker: &str, port: u16, client_id: &str, user: &str, pass: &str) {
        let options = SessionOptions {
            broker: broker.to_string(),
            port,
            client_id: client_id.to_string(),
            buffer_size: self.tuning.buffer_size,
            keep_alive: self.tuning.keep_alive,
            socket_timeout: self.tuning.socket_timeout,
            bind_device: self.tuning.bind_device.clone(),
        };
        self.session.configure(&options);
        self.options = Some(options);
        self.credentials = Credentials::from_parts(user, pass);
        info!("MQTT configured for {}:{} as {}", broker, port, client_id);
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Time of the last reconnect attempt, if any
    pub fn last_reconnect_attempt(&self) -> Option<tokio::time::Instant> {
        self.cooldown.last_attempt()
    }

    pub fn set_message_handler(&mut self, handler: MessageHandler) {
        self.handler = Some(handler);
    }

    fn transition(&mut self, next: LinkState) {
        if self.state != next {
            debug!("Messaging link {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Opens the broker session over the live cellular bearer.
    ///
    /// # Errors
    ///
    /// - `NotInitialized`: `initialize` was never called
    /// - `TransportUnavailable`: the cellular link is down
    /// - `BrokerAuthFailed`: the broker refused or could not be reached
    pub async fn connect<M: Modem>(&mut self, cellular: &mut CellularLink<M>) -> Result<()> {
        if self.options.is_none() {
            return Err(NodeError::NotInitialized("messaging link"));
        }

        if !cellular.is_connected().await {
            warn!("Cannot open MQTT session: cellular link down");
            self.transition(LinkState::Error);
            return Err(NodeError::TransportUnavailable);
        }

        self.transition(LinkState::Connecting);
        info!("Connecting to MQTT broker...");

        match self.session.connect(self.credentials.as_ref()).await {
            Ok(()) => {
                self.transition(LinkState::Connected);
                info!("MQTT session established");
                Ok(())
            }
            Err(e) => {
                warn!("MQTT connect failed: {}", e);
                self.transition(LinkState::Error);
                Err(e)
            }
        }
    }

    /// Closes the session. Always ends `Disconnected`.
    pub async fn disconnect(&mut self) {
        if self.session.is_connected() {
            info!("Disconnecting MQTT session");
        }
        self.session.disconnect().await;
        self.transition(LinkState::Disconnected);
    }

    /// Checks the session, downgrading a stale `Connected` state.
    ///
    /// Once downgraded the link stays down until the next `connect`, even if
    /// the session reports alive again.
    pub fn is_connected(&mut self) -> bool {
        if self.state != LinkState::Connected {
            return false;
        }
        if !self.session.is_connected() {
            warn!("MQTT session dropped");
            self.transition(LinkState::Disconnected);
            return false;
        }
        true
    }

    /// Services keep-alive and dispatches inbound messages. No-op when down.
    pub async fn process_pending(&mut self) {
        if !self.is_connected() {
            return;
        }

        let inbound = self.session.poll().await;
        for message in &inbound {
            debug!("Inbound message on {} ({} bytes)", message.topic, message.payload.len());
            if let Some(handler) = self.handler.as_mut() {
                handler(message);
            }
        }

        // Surface a drop noticed while polling
        self.is_connected();
    }

    /// Restores the session if needed, honouring the reconnect cooldown.
    ///
    /// A live session over a live bearer returns immediately without touching
    /// the cooldown. Otherwise at most one attempt is made per cooldown
    /// window: the cellular layer is restored first, then the broker session.
    pub async fn ensure_connection<M: Modem>(&mut self, cellular: &mut CellularLink<M>) -> Result<()> {
        if self.is_connected() {
            if cellular.is_connected().await {
                return Ok(());
            }
            warn!("Cellular bearer lost under live MQTT session");
            self.session.disconnect().await;
            self.transition(LinkState::Disconnected);
        }

        if let Err(remaining) = self.cooldown.try_begin() {
            debug!("MQTT reconnect deferred, {} ms of cooldown left", remaining.as_millis());
            return Err(NodeError::ReconnectCooldown {
                remaining_ms: remaining.as_millis() as u64,
            });
        }

        info!("Reconnecting MQTT session...");

        if let Err(e) = cellular.ensure_connection().await {
            warn!("MQTT reconnect aborted, cellular link unavailable: {}", e);
            self.transition(LinkState::Error);
            return Err(NodeError::TransportUnavailable);
        }

        self.connect(cellular).await
    }

    /// Publishes `sample` to its device topic.
    ///
    /// # Errors
    ///
    /// - `NotConnected`: the link could not be brought up
    /// - `SessionLost`: the session dropped after the connection check
    /// - `PublishRejected`: the session refused the publish
    pub async fn publish_telemetry<M: Modem>(
        &mut self,
        sample: &TelemetrySample,
        cellular: &mut CellularLink<M>,
    ) -> Result<()> {
        if let Err(e) = self.ensure_connection(cellular).await {
            warn!("Telemetry not published: {}", e);
            return Err(NodeError::NotConnected);
        }

        self.process_pending().await;

        let topic = self.topics.topic_for(&sample.device_id);
        let payload = sample.to_json()?;
        debug!("Publishing to {}: {}", topic, payload);

        self.send(&topic, payload.as_bytes(), false).await?;
        info!("Telemetry published to {}", topic);
        Ok(())
    }

    /// Publishes an arbitrary payload with the same connection precondition
    pub async fn publish<M: Modem>(
        &mut self,
        topic: &str,
        payload: &[u8],
        retained: bool,
        cellular: &mut CellularLink<M>,
    ) -> Result<()> {
        if let Err(e) = self.ensure_connection(cellular).await {
            warn!("Publish to {} skipped: {}", topic, e);
            return Err(NodeError::NotConnected);
        }

        self.send(topic, payload, retained).await
    }

    async fn send(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<()> {
        // Liveness can change between the ensure and here
        if !self.is_connected() {
            return Err(NodeError::SessionLost);
        }

        match self.session.publish(topic, payload, retained).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Publish to {} failed: {}", topic, e);
                self.is_connected();
                Err(match e {
                    NodeError::PublishRejected(_) => e,
                    other => NodeError::PublishRejected(other.to_string()),
                })
            }
        }
    }

    pub async fn subscribe(&mut self, topic: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(NodeError::NotConnected);
        }
        self.session.subscribe(topic).await
    }
}
