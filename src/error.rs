//! # Error Types
//!
//! Custom error types for the SmartWaste node using `thiserror`.
//!
//! Sensor-side variants (`SensorInvalid`, `LocationTimeout`) are never fatal:
//! the orchestrator encodes them as sentinels in the published sample.

use thiserror::Error;

/// Main error type for the SmartWaste node
#[derive(Debug, Error)]
pub enum NodeError {
    /// Modem has not completed its power-on handshake
    #[error("modem not ready")]
    ModemNotReady,

    /// SIM requires a PIN that is missing or was rejected
    #[error("SIM locked")]
    SimLocked,

    /// SIM missing, anti-theft locked or otherwise unusable
    #[error("SIM error: {0}")]
    SimError(String),

    /// Network registration did not complete within the timeout
    #[error("network registration timed out")]
    RegistrationTimeout,

    /// Data bearer could not be attached or did not verify after attach
    #[error("bearer attach failed: {0}")]
    BearerAttachFailed(String),

    /// Messaging layer found the cellular link down
    #[error("cellular transport unavailable")]
    TransportUnavailable,

    /// Broker refused the session
    #[error("broker connection failed: {0}")]
    BrokerAuthFailed(String),

    /// Session dropped between the connection check and the publish call
    #[error("broker session lost before publish")]
    SessionLost,

    /// Broker session did not accept the publish
    #[error("publish rejected: {0}")]
    PublishRejected(String),

    /// Operation needs a live session
    #[error("not connected")]
    NotConnected,

    /// Component used before `initialize`
    #[error("{0} not initialized")]
    NotInitialized(&'static str),

    /// Reconnect refused because the cooldown window has not elapsed
    #[error("reconnect cooldown active ({remaining_ms} ms remaining)")]
    ReconnectCooldown { remaining_ms: u64 },

    /// Distance sensor produced no usable reading
    #[error("sensor reading invalid")]
    SensorInvalid,

    /// No GNSS fix within the timeout
    #[error("location fix timed out")]
    LocationTimeout,

    /// AT command failed or returned an unexpected response
    #[error("modem error: {0}")]
    Modem(String),

    /// Serial port errors
    #[error("serial error: {0}")]
    Serial(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Payload encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Modem and SIM failures; the node cannot recover from these at boot
    pub fn is_hardware_fault(&self) -> bool {
        matches!(
            self,
            NodeError::ModemNotReady
                | NodeError::SimLocked
                | NodeError::SimError(_)
                | NodeError::Modem(_)
        )
    }
}

/// Result type alias for the SmartWaste node
pub type Result<T> = std::result::Result<T, NodeError>;
