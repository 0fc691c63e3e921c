//! rumqttc-backed broker transport
//!
//! The module separates pure functions from I/O operations:
//!
//! - [`connection`] - option building, URL parsing and error translation
//! - [`message_handler`] - event routing and packet id bookkeeping
//! - [`client`] - the connector, its live link and the event pump
//!
//! # Usage
//!
//! ```rust,no_run
//! use itemreminder_mqtt::protocol::{Credentials, Endpoint};
//! use itemreminder_mqtt::session::{LoggingObserver, SessionManager, SessionSettings};
//! use itemreminder_mqtt::transport::mqtt::MqttConnector;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let session = SessionManager::new(
//!     MqttConnector::new(),
//!     SessionSettings::default(),
//!     Arc::new(LoggingObserver),
//! );
//! session
//!     .connect(
//!         Endpoint::tls("broker.example.com"),
//!         Credentials::new("user", "secret"),
//!         Duration::from_secs(60),
//!     )
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttConnector, MqttLink};
pub use connection::{configure_mqtt_options, parse_broker_url, InvalidBrokerUrl};
pub use message_handler::{EventRoute, MessageHandler, RequestTracker};
