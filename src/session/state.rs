//! Session state machine and the status events it emits

use std::fmt;

/// Lifecycle state of a [`super::SessionManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No transport; initial and terminal state
    Disconnected,
    /// First handshake in progress
    Connecting,
    /// Handshake completed and credentials accepted
    Connected,
    /// Transport lost; backing off between handshake attempts
    Reconnecting,
    /// `disconnect` in progress
    ShuttingDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// Why a session ended up Disconnected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The caller invoked `disconnect`
    Requested,
    /// `max_reconnect_attempts` handshakes failed in a row
    ReconnectAttemptsExhausted { attempts: u32 },
    /// The broker rejected our credentials while reconnecting
    AuthRejected,
}

/// Structured status events delivered to the session observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Connected,
    Disconnected(DisconnectReason),
    Reconnecting { attempt: u32 },
    SubscriptionRestored { topic: String },
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::Connected => write!(f, "connected"),
            StatusEvent::Disconnected(DisconnectReason::Requested) => {
                write!(f, "disconnected (requested)")
            }
            StatusEvent::Disconnected(DisconnectReason::ReconnectAttemptsExhausted {
                attempts,
            }) => write!(f, "disconnected (gave up after {attempts} reconnect attempts)"),
            StatusEvent::Disconnected(DisconnectReason::AuthRejected) => {
                write!(f, "disconnected (credentials rejected)")
            }
            StatusEvent::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            StatusEvent::SubscriptionRestored { topic } => {
                write!(f, "subscription restored: {topic}")
            }
        }
    }
}
