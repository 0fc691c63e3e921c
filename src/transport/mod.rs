//! Broker capability interface
//!
//! The session core never speaks MQTT itself. It drives a [`BrokerConnector`]
//! that produces one [`BrokerConnection`] per successful handshake: an
//! outbound [`BrokerLink`] plus a channel of [`InboundFrame`]s. The production
//! connector lives in [`mqtt`]; tests use [`crate::testing::MockConnector`].

use crate::error::ConnectError;
use crate::protocol::{Credentials, Endpoint, Message, QoS};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Everything a connector needs for one handshake
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub endpoint: Endpoint,
    pub credentials: Credentials,
    pub keepalive: Duration,
    pub client_id: String,
    /// Message the broker publishes on our behalf if the link drops ungracefully
    pub last_will: Option<Message>,
}

/// Frames surfaced by a live link to the session supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Application message on a subscribed topic
    Message(Message),
    /// The broker completed delivery of publish `request_id`
    PublishAcked { request_id: u64 },
    /// The broker answered subscribe `request_id`
    SubscribeAcked { request_id: u64, accepted: bool },
    /// The transport is gone; no further frames follow
    ConnectionLost { reason: String },
}

/// Outbound failures of a live link
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Link is closed")]
    Closed,
    #[error("Transport request failed")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// One established broker connection
pub struct BrokerConnection {
    pub link: Arc<dyn BrokerLink>,
    pub inbound: mpsc::Receiver<InboundFrame>,
}

/// Handshake capability
#[async_trait::async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// Open a transport, authenticate and return once the broker accepted us
    async fn connect(&self, params: &ConnectParams) -> Result<BrokerConnection, ConnectError>;
}

/// Outbound capability of one live connection
///
/// Request ids are chosen by the session. The link must echo them back in
/// [`InboundFrame::PublishAcked`] and [`InboundFrame::SubscribeAcked`].
#[async_trait::async_trait]
pub trait BrokerLink: Send + Sync {
    async fn subscribe(&self, request_id: u64, topic: &str, qos: QoS) -> Result<(), LinkError>;

    /// Hand a message to the transport. For qos 0 no ack frame is expected.
    async fn publish(&self, request_id: u64, message: &Message) -> Result<(), LinkError>;

    /// Close the transport after flushing anything already handed over
    async fn disconnect(&self) -> Result<(), LinkError>;
}
