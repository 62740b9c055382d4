//! Connection to the inference service.
//!
//! A transport turns a `SessionConfig` into a pair of unbounded channels:
//! outbound messages to the service and inbound `StreamEvent`s from it.

use crate::error::{Result, VoxdeskError};
use crate::session::config::SessionConfig;
use crate::session::events::{Outbound, StreamEvent};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Open channels to one live session.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: UnboundedSender<Outbound>,
    pub inbound: UnboundedReceiver<StreamEvent>,
}

/// Opens sessions with an inference service.
#[async_trait]
pub trait InferenceTransport: Send + Sync {
    /// Connect and complete the setup handshake.
    ///
    /// # Errors
    /// `VoxdeskError::Connection` when the service cannot be reached or
    /// refuses the setup.
    async fn connect(&self, config: &SessionConfig) -> Result<TransportLink>;
}

/// Service side of one in-process connection.
#[derive(Debug)]
pub struct ServiceEnd {
    /// Configuration the client connected with.
    pub config: SessionConfig,
    /// Events delivered to the client's dispatcher.
    pub events: UnboundedSender<StreamEvent>,
    /// Messages sent by the client.
    pub outbound: UnboundedReceiver<Outbound>,
}

impl ServiceEnd {
    /// Deliver an event. False once the client is gone.
    pub fn send(&self, event: StreamEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Next client message, `None` once the client dropped its sender.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Everything the client has sent so far, without waiting.
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// Accepts connections made through a `ChannelTransport`.
#[derive(Debug)]
pub struct ServiceListener {
    ends: UnboundedReceiver<ServiceEnd>,
}

impl ServiceListener {
    pub async fn accept(&mut self) -> Option<ServiceEnd> {
        self.ends.recv().await
    }

    pub fn try_accept(&mut self) -> Option<ServiceEnd> {
        self.ends.try_recv().ok()
    }
}

/// In-process transport for embedding and tests.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    ends: UnboundedSender<ServiceEnd>,
    failure: Option<String>,
    connect_delay: Option<Duration>,
}

impl ChannelTransport {
    /// Create a transport and the listener that receives its connections.
    pub fn pair() -> (Self, ServiceListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                ends: tx,
                failure: None,
                connect_delay: None,
            },
            ServiceListener { ends: rx },
        )
    }

    /// Every connect fails with this message.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Wait this long before each connect resolves.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }
}

#[async_trait]
impl InferenceTransport for ChannelTransport {
    async fn connect(&self, config: &SessionConfig) -> Result<TransportLink> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(VoxdeskError::Connection {
                message: message.clone(),
            });
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let end = ServiceEnd {
            config: config.clone(),
            events: inbound_tx,
            outbound: outbound_rx,
        };
        self.ends.send(end).map_err(|_| VoxdeskError::Connection {
            message: "service listener is gone".to_string(),
        })?;

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
