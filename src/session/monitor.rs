//! Pure session health bookkeeping: state guards, transition logging and
//! metrics derivation. Nothing here touches the transport.

use super::state::SessionState;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Pure health monitoring decisions
pub struct SessionMonitor;

impl SessionMonitor {
    /// Check if session state allows publishing
    pub fn can_publish(state: SessionState) -> bool {
        matches!(state, SessionState::Connected)
    }

    /// Check if session state allows subscribing
    pub fn can_subscribe(state: SessionState) -> bool {
        matches!(state, SessionState::Connected)
    }

    /// Whether a publish made in this state may be parked in the offline queue
    pub fn can_queue(state: SessionState, queue_capacity: usize) -> bool {
        queue_capacity > 0 && matches!(state, SessionState::Reconnecting)
    }

    /// Log session state transition
    pub fn log_state_transition(from: SessionState, to: SessionState) {
        match (from, to) {
            (SessionState::Connecting, SessionState::Connected) => {
                info!("MQTT session established");
            }
            (SessionState::Connected, SessionState::Reconnecting) => {
                warn!("MQTT connection lost, reconnecting");
            }
            (SessionState::Reconnecting, SessionState::Connected) => {
                info!("Reconnection successful");
            }
            (SessionState::Reconnecting, SessionState::Disconnected) => {
                error!("MQTT session permanently disconnected");
            }
            _ => {
                info!(from = %from, to = %to, "MQTT session state changed");
            }
        }
    }

    /// Calculate health metrics for the session
    pub fn calculate_metrics(
        state: SessionState,
        connected_since: Option<Instant>,
        reconnect_count: u32,
        pending_publishes: usize,
        subscriptions: usize,
    ) -> SessionMetrics {
        let uptime = connected_since.map(|t| Instant::now().duration_since(t));
        SessionMetrics {
            state,
            uptime,
            reconnect_count,
            pending_publishes,
            subscriptions,
            is_healthy: SessionMonitor::can_publish(state),
        }
    }
}

/// Snapshot of session health
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetrics {
    pub state: SessionState,
    /// Time since the current transport was established
    pub uptime: Option<Duration>,
    /// Successful reconnects over the session lifetime
    pub reconnect_count: u32,
    pub pending_publishes: usize,
    pub subscriptions: usize,
    pub is_healthy: bool,
}
