//! Broker session capability and its rumqttc implementation

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, NetworkOptions, Outgoing, Packet,
    QoS,
};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::error::{NodeError, Result};

/// Request channel capacity between the client handle and the event loop
const REQUEST_CAPACITY: usize = 10;

/// How long a single `poll` waits for the next network event
const POLL_SLICE: Duration = Duration::from_millis(10);

/// Upper bound on events handled by one `poll`; the rest wait for the next tick
const MAX_EVENTS_PER_POLL: usize = 32;

/// Connection parameters for a broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    /// Max packet size in both directions
    pub buffer_size: usize,
    pub keep_alive: Duration,
    pub socket_timeout: Duration,
    /// Interface the TCP socket is bound to; default route when `None`
    pub bind_device: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub pass: String,
}

impl Credentials {
    /// Credentials are only used when both user and password are non-empty
    pub fn from_parts(user: &str, pass: &str) -> Option<Self> {
        if user.is_empty() || pass.is_empty() {
            None
        } else {
            Some(Self {
                user: user.to_string(),
                pass: pass.to_string(),
            })
        }
    }
}

/// Message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publish/subscribe session with a broker
#[async_trait]
pub trait BrokerSession: Send {
    /// Stores the connection parameters used by the next `connect`
    fn configure(&mut self, options: &SessionOptions);

    /// Opens the session.
    ///
    /// Fails with `BrokerAuthFailed` when the broker is unreachable or
    /// refuses the CONNECT.
    async fn connect(&mut self, credentials: Option<&Credentials>) -> Result<()>;

    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Services keep-alive and returns messages received since the last call
    async fn poll(&mut self) -> Vec<InboundMessage>;

    async fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<()>;

    async fn subscribe(&mut self, topic: &str) -> Result<()>;
}

/// MQTT 3.1.1 session over rumqttc
///
/// The event loop is driven inline by `connect`, `poll` and `publish`; there
/// is no background task.
#[derive(Default)]
pub struct MqttSession {
    options: Option<SessionOptions>,
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
    connected: bool,
    pending: Vec<InboundMessage>,
}

impl std::fmt::Debug for MqttSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSession")
            .field("options", &self.options)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl MqttSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn mqtt_options(options: &SessionOptions, credentials: Option<&Credentials>) -> MqttOptions {
        let mut mqtt = MqttOptions::new(&options.client_id, &options.broker, options.port);
        mqtt.set_keep_alive(options.keep_alive);
        mqtt.set_clean_session(true);
        mqtt.set_max_packet_size(options.buffer_size, options.buffer_size);
        if let Some(credentials) = credentials {
            mqtt.set_credentials(&credentials.user, &credentials.pass);
        }
        mqtt
    }

    fn network_options(options: &SessionOptions) -> NetworkOptions {
        let mut network = NetworkOptions::new();
        network.set_connection_timeout(options.socket_timeout.as_secs());
        if let Some(device) = options.bind_device.as_deref() {
            #[cfg(target_os = "linux")]
            network.set_bind_device(device);
            #[cfg(not(target_os = "linux"))]
            warn!("Binding to {} is only supported on Linux, using default route", device);
        }
        network
    }

    fn drop_session(&mut self) {
        self.client = None;
        self.eventloop = None;
        self.connected = false;
    }
}

#[async_trait]
impl BrokerSession for MqttSession {
    fn configure(&mut self, options: &SessionOptions) {
        self.options = Some(options.clone());
    }

    async fn connect(&mut self, credentials: Option<&Credentials>) -> Result<()> {
        let options = self
            .options
            .clone()
            .ok_or(NodeError::NotInitialized("broker session"))?;

        self.drop_session();
        match options.bind_device.as_deref() {
            Some(device) => info!(
                "Opening MQTT session to {}:{} via {}",
                options.broker, options.port, device
            ),
            None => info!("Opening MQTT session to {}:{}", options.broker, options.port),
        }

        let (client, mut eventloop) =
            AsyncClient::new(Self::mqtt_options(&options, credentials), REQUEST_CAPACITY);
        eventloop.set_network_options(Self::network_options(&options));

        let connack = timeout(options.socket_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack),
                    Ok(_) => continue,
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match connack {
            Ok(Ok(ack)) if ack.code == ConnectReturnCode::Success => {
                debug!("CONNACK received, session present: {}", ack.session_present);
                self.client = Some(client);
                self.eventloop = Some(eventloop);
                self.connected = true;
                Ok(())
            }
            Ok(Ok(ack)) => Err(NodeError::BrokerAuthFailed(format!("{:?}", ack.code))),
            Ok(Err(e)) => Err(NodeError::BrokerAuthFailed(e.to_string())),
            Err(_) => Err(NodeError::BrokerAuthFailed(
                "timed out waiting for CONNACK".to_string(),
            )),
        }
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.as_ref() {
            if let Err(e) = client.try_disconnect() {
                debug!("MQTT disconnect request not queued: {}", e);
            }
        }
        if let Some(eventloop) = self.eventloop.as_mut() {
            // Flush the DISCONNECT packet, bounded by one poll slice
            let _ = timeout(POLL_SLICE, eventloop.poll()).await;
        }
        self.drop_session();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn poll(&mut self) -> Vec<InboundMessage> {
        let mut inbound = std::mem::take(&mut self.pending);
        let Some(eventloop) = self.eventloop.as_mut() else {
            return inbound;
        };

        for _ in 0..MAX_EVENTS_PER_POLL {
            match timeout(POLL_SLICE, eventloop.poll()).await {
                Err(_) => break,
                Ok(Ok(Event::Incoming(Packet::Publish(p)))) => inbound.push(InboundMessage {
                    topic: p.topic.clone(),
                    payload: p.payload.to_vec(),
                }),
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    warn!("Broker closed the session");
                    self.connected = false;
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!("MQTT connection error: {}", e);
                    self.connected = false;
                    break;
                }
            }
        }

        inbound
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<()> {
        let socket_timeout = self
            .options
            .as_ref()
            .map(|o| o.socket_timeout)
            .ok_or(NodeError::NotInitialized("broker session"))?;
        let (Some(client), Some(eventloop)) = (self.client.as_ref(), self.eventloop.as_mut()) else {
            return Err(NodeError::NotConnected);
        };

        client
            .publish(topic, QoS::AtMostOnce, retained, payload.to_vec())
            .await
            .map_err(|e| NodeError::PublishRejected(e.to_string()))?;

        // Drive the event loop until the packet is on the wire
        let pending = &mut self.pending;
        let sent = timeout(socket_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(_))) => return Ok(()),
                    Ok(Event::Incoming(Packet::Publish(p))) => pending.push(InboundMessage {
                        topic: p.topic.clone(),
                        payload: p.payload.to_vec(),
                    }),
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match sent {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.connected = false;
                Err(NodeError::PublishRejected(e.to_string()))
            }
            Err(_) => Err(NodeError::PublishRejected("timed out sending publish".to_string())),
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        let Some(client) = self.client.as_ref() else {
            return Err(NodeError::NotConnected);
        };
        client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| NodeError::PublishRejected(e.to_string()))?;
        info!("Subscribed to {}", topic);
        Ok(())
    }
}
