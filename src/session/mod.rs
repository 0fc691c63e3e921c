//! Reliable publish/subscribe session on top of a broker connector
//!
//! [`SessionManager`] is the entry point. The remaining modules hold the
//! pieces it is assembled from: the state machine and status events, the
//! backoff policy, pure health checks, the observer interface, tunables and
//! the per-publish completion handle.

pub mod handle;
pub mod manager;
pub mod monitor;
pub mod observer;
pub mod reconnect;
pub mod settings;
pub mod state;

pub use handle::PublishHandle;
pub use manager::{SessionManager, Subscription};
pub use monitor::{SessionMetrics, SessionMonitor};
pub use observer::{ChannelObserver, LoggingObserver, SessionNotification, SessionObserver};
pub use reconnect::{ReconnectPolicy, ReconnectionDecision};
pub use settings::{Presence, SessionSettings};
pub use state::{DisconnectReason, SessionState, StatusEvent};
