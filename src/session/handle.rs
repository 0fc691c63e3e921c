//! Completion handle returned by [`super::SessionManager::publish`]

use super::manager::{PublishOutcome, Shared};
use crate::error::PublishError;
use crate::protocol::QoS;
use std::sync::Weak;
use tokio::sync::oneshot;

enum HandleState {
    /// qos 0: nothing to wait for
    Completed,
    /// Awaiting the broker acknowledgement
    Pending {
        receiver: oneshot::Receiver<PublishOutcome>,
        session: Weak<Shared>,
    },
    /// Outcome observed while attempting to cancel
    Resolved(PublishOutcome),
    Cancelled,
}

/// Tracks one publish until it is acknowledged, expires or is cancelled
///
/// Dropping the handle does not cancel the publish; its pending entry still
/// expires after the ack timeout.
pub struct PublishHandle {
    id: u64,
    qos: QoS,
    state: HandleState,
}

impl PublishHandle {
    pub(crate) fn completed(id: u64, qos: QoS) -> Self {
        Self {
            id,
            qos,
            state: HandleState::Completed,
        }
    }

    pub(crate) fn pending(
        id: u64,
        qos: QoS,
        receiver: oneshot::Receiver<PublishOutcome>,
        session: Weak<Shared>,
    ) -> Self {
        Self {
            id,
            qos,
            state: HandleState::Pending { receiver, session },
        }
    }

    /// Session-local publish id (never reused within a session)
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Whether the outcome is still unknown
    pub fn is_pending(&self) -> bool {
        matches!(self.state, HandleState::Pending { .. })
    }

    /// Wait for the acknowledgement
    ///
    /// Resolves `Ok` on ack, `AckTimeout` when the ack timeout elapses,
    /// `ConnectionLost` when the session shuts down first and `Cancelled`
    /// after [`PublishHandle::cancel`].
    pub async fn wait(self) -> Result<(), PublishError> {
        match self.state {
            HandleState::Completed => Ok(()),
            HandleState::Resolved(outcome) => outcome,
            HandleState::Cancelled => Err(PublishError::Cancelled { id: self.id }),
            HandleState::Pending { receiver, .. } => match receiver.await {
                Ok(outcome) => outcome,
                Err(_) => Err(PublishError::ConnectionLost),
            },
        }
    }

    /// Stop tracking this publish. Any ack arriving later is ignored.
    ///
    /// Returns false if the outcome was already known; in that case
    /// [`PublishHandle::wait`] still reports it.
    pub async fn cancel(&mut self) -> bool {
        match std::mem::replace(&mut self.state, HandleState::Cancelled) {
            HandleState::Pending {
                mut receiver,
                session,
            } => {
                if let Ok(outcome) = receiver.try_recv() {
                    self.state = HandleState::Resolved(outcome);
                    return false;
                }
                drop(receiver);
                if let Some(shared) = session.upgrade() {
                    shared.cancel_publish(self.id).await;
                }
                true
            }
            previous @ (HandleState::Completed | HandleState::Resolved(_)) => {
                self.state = previous;
                false
            }
            HandleState::Cancelled => false,
        }
    }
}

impl std::fmt::Debug for PublishHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            HandleState::Completed => "completed",
            HandleState::Pending { .. } => "pending",
            HandleState::Resolved(_) => "resolved",
            HandleState::Cancelled => "cancelled",
        };
        f.debug_struct("PublishHandle")
            .field("id", &self.id)
            .field("qos", &self.qos)
            .field("state", &state)
            .finish()
    }
}
