//! # Link Module
//!
//! Layered connectivity management.
//!
//! This module handles:
//! - Cellular registration and data bearer supervision ([`CellularLink`])
//! - The broker session on top of the bearer ([`MessagingLink`])
//! - The rumqttc-backed broker session ([`MqttSession`])
//!
//! Each layer caches a [`LinkState`] but never trusts it: a health check that
//! finds the transport down downgrades the cached state to `Disconnected`
//! before answering.

pub mod cellular;
pub mod messaging;
pub mod session;

#[cfg(test)]
pub mod mocks;

pub use cellular::CellularLink;
pub use messaging::MessagingLink;
pub use session::{BrokerSession, Credentials, InboundMessage, MqttSession, SessionOptions};

/// Connection state of a link layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Cellular network snapshot, recomputed on every call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub registered: bool,
    pub operator_name: String,
    /// 0-31, or 99 when unknown
    pub signal_quality: i32,
    pub ip_address: String,
}
