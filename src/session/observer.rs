//! Observer interface through which a session reports to its owner

use super::state::StatusEvent;
use crate::protocol::Message;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Receives status transitions and inbound messages from a session
///
/// Called from the session supervisor task; implementations must not block.
pub trait SessionObserver: Send + Sync {
    fn handle_status(&self, event: &StatusEvent);

    fn handle_message(&self, message: &Message);
}

/// Observer that writes everything to the tracing log
#[derive(Debug, Default, Clone)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn handle_status(&self, event: &StatusEvent) {
        match event {
            StatusEvent::Disconnected(reason) => warn!(?reason, "Session status: {}", event),
            _ => info!("Session status: {}", event),
        }
    }

    fn handle_message(&self, message: &Message) {
        info!(
            topic = %message.topic,
            qos = ?message.qos,
            bytes = message.payload.len(),
            "Received message: {}",
            message.payload_str()
        );
    }
}

/// Everything a [`ChannelObserver`] forwards
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotification {
    Status(StatusEvent),
    Message(Message),
}

/// Observer that forwards notifications into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<SessionNotification>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionNotification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl SessionObserver for ChannelObserver {
    fn handle_status(&self, event: &StatusEvent) {
        let _ = self.sender.send(SessionNotification::Status(event.clone()));
    }

    fn handle_message(&self, message: &Message) {
        let _ = self.sender.send(SessionNotification::Message(message.clone()));
    }
}
