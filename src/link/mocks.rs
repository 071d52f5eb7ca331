//! Broker session fake for testing

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::session::{BrokerSession, Credentials, InboundMessage, SessionOptions};
use crate::error::{NodeError, Result};

#[derive(Debug)]
pub struct FakeSessionState {
    pub options: Option<SessionOptions>,
    pub connected: bool,
    pub connect_ok: bool,
    pub connect_calls: u32,
    pub last_credentials: Option<Credentials>,
    pub disconnect_calls: u32,
    pub publish_ok: bool,
    /// Publish failure also tears the session down
    pub publish_drops_session: bool,
    /// Next poll reports the session as dropped
    pub drop_on_poll: bool,
    pub polls: u32,
    pub published: Vec<(String, String, bool)>,
    pub subscriptions: Vec<String>,
    pub inbound: VecDeque<InboundMessage>,
}

/// Broker session with shared, inspectable state
#[derive(Debug, Clone)]
pub struct FakeSession {
    state: Arc<Mutex<FakeSessionState>>,
}

impl FakeSession {
    /// Broker that accepts every connect and publish
    pub fn accepting() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeSessionState {
                options: None,
                connected: false,
                connect_ok: true,
                connect_calls: 0,
                last_credentials: None,
                disconnect_calls: 0,
                publish_ok: true,
                publish_drops_session: false,
                drop_on_poll: false,
                polls: 0,
                published: Vec::new(),
                subscriptions: Vec::new(),
                inbound: VecDeque::new(),
            })),
        }
    }

    /// Broker that refuses every CONNECT
    pub fn refusing() -> Self {
        let session = Self::accepting();
        session.state().connect_ok = false;
        session
    }

    pub fn state(&self) -> MutexGuard<'_, FakeSessionState> {
        self.state.lock().unwrap()
    }

    /// Queues an inbound message for the next poll
    pub fn deliver(&self, topic: &str, payload: &str) {
        self.state().inbound.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        });
    }
}

#[async_trait]
impl BrokerSession for FakeSession {
    fn configure(&mut self, options: &SessionOptions) {
        self.state().options = Some(options.clone());
    }

    async fn connect(&mut self, credentials: Option<&Credentials>) -> Result<()> {
        let mut state = self.state();
        state.connect_calls += 1;
        state.last_credentials = credentials.cloned();
        if state.connect_ok {
            state.connected = true;
            Ok(())
        } else {
            state.connected = false;
            Err(NodeError::BrokerAuthFailed("NotAuthorized".to_string()))
        }
    }

    async fn disconnect(&mut self) {
        let mut state = self.state();
        state.disconnect_calls += 1;
        state.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn poll(&mut self) -> Vec<InboundMessage> {
        let mut state = self.state();
        state.polls += 1;
        if state.drop_on_poll {
            state.drop_on_poll = false;
            state.connected = false;
        }
        state.inbound.drain(..).collect()
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<()> {
        let mut state = self.state();
        if !state.publish_ok {
            if state.publish_drops_session {
                state.connected = false;
            }
            return Err(NodeError::PublishRejected("queue full".to_string()));
        }
        state.published.push((
            topic.to_string(),
            String::from_utf8_lossy(payload).into_owned(),
            retained,
        ));
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.state().subscriptions.push(topic.to_string());
        Ok(())
    }
}
