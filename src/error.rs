//! Typed failures for every session operation
//!
//! Each operation has its own error enum so callers match only on outcomes
//! that operation can actually produce. [`ClientError`] wraps them all for the
//! binary.

use crate::protocol::TopicError;
use crate::session::SessionState;
use thiserror::Error;

/// Failure to establish (or re-establish) a broker session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Broker rejected the supplied credentials")]
    AuthRejected,

    #[error("Broker unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    #[error("Connection attempt timed out")]
    Timeout,

    #[error("Broker refused the connection: {0}")]
    Refused(String),

    #[error("Session is already active (state: {state:?})")]
    AlreadyActive { state: SessionState },

    #[error("Connection lost before the handshake completed")]
    ConnectionLost,
}

impl ConnectError {
    /// Whether retrying the same handshake could succeed
    ///
    /// Credentials do not change between attempts, so an auth rejection is final.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ConnectError::AuthRejected | ConnectError::AlreadyActive { .. }
        )
    }
}

/// Failure to register a subscription
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: SessionState },

    #[error("Broker rejected subscription to '{topic}'")]
    BrokerRejected { topic: String },

    #[error("Invalid topic filter: {0}")]
    InvalidTopic(#[from] TopicError),

    #[error("No subscription acknowledgement received in time")]
    AckTimeout,

    #[error("Connection lost while subscribing")]
    ConnectionLost,
}

/// Failure to publish or to confirm delivery of a publish
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: SessionState },

    #[error("No acknowledgement for publish {id} within the ack timeout")]
    AckTimeout { id: u64 },

    #[error("Publish {id} was cancelled")]
    Cancelled { id: u64 },

    #[error("Connection lost before publish was acknowledged")]
    ConnectionLost,

    #[error("Invalid topic name: {0}")]
    InvalidTopic(#[from] TopicError),

    #[error("Offline queue is full ({capacity} messages)")]
    QueueFull { capacity: usize },
}

/// Top-level error for the client binary
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Connect failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("Subscribe failed: {0}")]
    Subscribe(#[from] SubscribeError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
