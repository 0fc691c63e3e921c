//! ItemReminder MQTT client
//!
//! A reliable publish/subscribe session over MQTT 3.1.1 for ItemReminder IoT
//! devices and back-ends.
//!
//! # Overview
//!
//! - [`session::SessionManager`] owns one logical broker connection: it
//!   connects over TLS, tracks subscriptions, correlates publish
//!   acknowledgements and reconnects with exponential backoff
//! - [`scheduler::ScheduledPublisher`] publishes a fresh reminder payload on a
//!   fixed interval
//! - [`config::ClientConfig`] loads the TOML configuration used by the
//!   `itemreminder-client` binary
//! - [`transport`] holds the broker capability traits and the rumqttc adapter
//!
//! # Quick Start
//!
//! ```rust
//! use itemreminder_mqtt::protocol::{Credentials, Endpoint, Message, QoS};
//! use itemreminder_mqtt::session::{LoggingObserver, SessionManager, SessionSettings};
//! use itemreminder_mqtt::testing::MockConnector;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let session = SessionManager::new(
//!     MockConnector::new(),
//!     SessionSettings::default(),
//!     Arc::new(LoggingObserver),
//! );
//! session
//!     .connect(
//!         Endpoint::tls("broker.example.com"),
//!         Credentials::new("device", "secret"),
//!         Duration::from_secs(60),
//!     )
//!     .await?;
//! session.subscribe("itemreminder/command", QoS::AtLeastOnce).await?;
//!
//! let handle = session
//!     .publish(Message::new("itemreminder/notification", r#"{"item":"Milk"}"#, QoS::AtLeastOnce))
//!     .await?;
//! handle.wait().await?;
//!
//! session.disconnect(true).await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ClientConfig, ConfigError, ReminderSchedule};
pub use error::{ClientError, ClientResult, ConnectError, PublishError, SubscribeError};
pub use protocol::*;
pub use scheduler::{Schedule, ScheduleStats, ScheduledPublisher};
pub use session::{
    PublishHandle, SessionManager, SessionObserver, SessionSettings, SessionState, StatusEvent,
};
pub use transport::mqtt::MqttConnector;
