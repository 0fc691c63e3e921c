//! TOML configuration for the ItemReminder client
//!
//! A config file has five sections:
//!
//! ```toml
//! [broker]
//! host = "broker.example.com"   # or broker_url = "mqtts://broker.example.com:8883"
//! port = 8883
//! use_tls = true
//! username_env = "MQTT_USERNAME"  # or username = "..."
//! password_env = "MQTT_PASSWORD"  # or password = "..."
//! keepalive_secs = 60
//!
//! [session]
//! ack_timeout_secs = 10
//! reconnect_base_delay_secs = 1
//! reconnect_max_delay_secs = 60
//!
//! [topics]
//! reminder = "itemreminder/notification"
//!
//! [presence]
//! enabled = true
//!
//! [reminders]
//! interval_secs = 30
//! priority = "medium"
//! ```
//!
//! Only `[broker]` is required. Credentials referenced through `*_env` are
//! resolved when [`ClientConfig::credentials`] is called, not at load time.

use crate::protocol::{
    validate_topic_filter, validate_topic_name, Credentials, Endpoint, Priority, QoS,
    DEFAULT_COMMAND_TOPIC, DEFAULT_REMINDER_TOPIC, DEFAULT_STATUS_TOPIC,
};
use crate::session::{Presence, ReconnectPolicy, SessionSettings};
use crate::transport::mqtt::parse_broker_url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const REDACTED: &str = "********";

/// Main client configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub topics: TopicsSection,
    #[serde(default)]
    pub presence: PresenceSection,
    #[serde(default)]
    pub reminders: ReminderSection,
}

/// A string that never shows up in `Debug` output
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker hostname (ignored when `broker_url` is set)
    pub host: Option<String>,
    /// Defaults to 8883 with TLS, 1883 without
    pub port: Option<u16>,
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    /// `mqtt://host[:port]` or `mqtts://host[:port]`
    pub broker_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<Secret>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Defaults to `itemreminder-<uuid>`
    pub client_id: Option<String>,
}

fn default_use_tls() -> bool {
    true
}

fn default_keepalive() -> u64 {
    60
}

/// Session section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSection {
    pub ack_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub reconnect_base_delay_secs: u64,
    pub reconnect_max_delay_secs: u64,
    /// Unlimited when absent
    pub max_reconnect_attempts: Option<u32>,
    /// Publishes parked while reconnecting; 0 disables the queue
    pub offline_queue_capacity: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ack_timeout_secs: 10,
            connect_timeout_secs: 30,
            reconnect_base_delay_secs: 1,
            reconnect_max_delay_secs: 60,
            max_reconnect_attempts: None,
            offline_queue_capacity: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TopicsSection {
    /// Outbound reminders
    pub reminder: String,
    /// Presence announcements
    pub status: String,
    /// Inbound commands (may be a filter)
    pub command: String,
}

impl Default for TopicsSection {
    fn default() -> Self {
        Self {
            reminder: DEFAULT_REMINDER_TOPIC.to_string(),
            status: DEFAULT_STATUS_TOPIC.to_string(),
            command: DEFAULT_COMMAND_TOPIC.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PresenceSection {
    pub enabled: bool,
    pub online_payload: String,
    pub offline_payload: String,
}

impl Default for PresenceSection {
    fn default() -> Self {
        let presence = Presence::default();
        Self {
            enabled: true,
            online_payload: presence.online_payload,
            offline_payload: presence.offline_payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReminderSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub priority: Priority,
    pub qos: QoS,
}

impl Default for ReminderSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            priority: Priority::Medium,
            qos: QoS::AtLeastOnce,
        }
    }
}

/// What the reminder publisher needs from the config
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderSchedule {
    pub topic: String,
    pub interval: Duration,
    pub priority: Priority,
    pub qos: QoS,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidConfig(message.into())
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint()?;

        if self.broker.port == Some(0) {
            return Err(invalid("broker.port must not be 0"));
        }
        if self.broker.keepalive_secs > u64::from(u16::MAX) {
            return Err(invalid(format!(
                "broker.keepalive_secs must be at most {}",
                u16::MAX
            )));
        }
        if matches!(&self.broker.client_id, Some(id) if id.trim().is_empty()) {
            return Err(invalid("broker.client_id must not be empty"));
        }
        if self.broker.username.is_some() && self.broker.username_env.is_some() {
            return Err(invalid(
                "broker.username and broker.username_env are mutually exclusive",
            ));
        }
        if self.broker.password.is_some() && self.broker.password_env.is_some() {
            return Err(invalid(
                "broker.password and broker.password_env are mutually exclusive",
            ));
        }

        if self.session.ack_timeout_secs == 0 {
            return Err(invalid("session.ack_timeout_secs must be greater than 0"));
        }
        if self.session.connect_timeout_secs == 0 {
            return Err(invalid("session.connect_timeout_secs must be greater than 0"));
        }
        self.reconnect_policy()
            .validate()
            .map_err(|e| invalid(format!("session: {e}")))?;

        for (name, topic) in [
            ("topics.reminder", &self.topics.reminder),
            ("topics.status", &self.topics.status),
        ] {
            validate_topic_name(topic).map_err(|e| invalid(format!("{name}: {e}")))?;
        }
        validate_topic_filter(&self.topics.command)
            .map_err(|e| invalid(format!("topics.command: {e}")))?;

        if self.reminders.interval_secs == 0 {
            return Err(invalid("reminders.interval_secs must be greater than 0"));
        }

        Ok(())
    }

    /// Broker endpoint from `broker_url`, or from `host`/`port`/`use_tls`
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        if let Some(broker_url) = &self.broker.broker_url {
            return parse_broker_url(broker_url).map_err(|e| invalid(e.to_string()));
        }

        let host = self
            .broker
            .host
            .as_deref()
            .filter(|host| !host.trim().is_empty())
            .ok_or_else(|| invalid("broker.host or broker.broker_url is required"))?;
        let default_port = if self.broker.use_tls { 8883 } else { 1883 };
        Ok(Endpoint::new(
            host,
            self.broker.port.unwrap_or(default_port),
            self.broker.use_tls,
        ))
    }

    /// Resolve credentials; anonymous when none are configured
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let username = Self::resolve(
            self.broker.username.clone(),
            self.broker.username_env.as_deref(),
        )?;
        let password = Self::resolve(
            self.broker.password.as_ref().map(|p| p.expose().to_string()),
            self.broker.password_env.as_deref(),
        )?;
        Ok(Credentials::new(
            username.unwrap_or_default(),
            password.unwrap_or_default(),
        ))
    }

    /// Helper method to get a value inline or from an environment variable
    fn resolve(inline: Option<String>, env_name: Option<&str>) -> Result<Option<String>, ConfigError> {
        match (inline, env_name) {
            (Some(value), _) => Ok(Some(value)),
            (None, Some(name)) => std::env::var(name)
                .map(Some)
                .map_err(|_| ConfigError::EnvVarNotFound(name.to_string())),
            (None, None) => Ok(None),
        }
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.broker.keepalive_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_secs(self.session.reconnect_base_delay_secs),
            max_delay: Duration::from_secs(self.session.reconnect_max_delay_secs),
            max_attempts: self.session.max_reconnect_attempts,
            ..ReconnectPolicy::default()
        }
    }

    pub fn presence(&self) -> Option<Presence> {
        self.presence.enabled.then(|| Presence {
            topic: self.topics.status.clone(),
            online_payload: self.presence.online_payload.clone(),
            offline_payload: self.presence.offline_payload.clone(),
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        let defaults = SessionSettings::default();
        SessionSettings {
            client_id: self.broker.client_id.clone().unwrap_or(defaults.client_id),
            ack_timeout: Duration::from_secs(self.session.ack_timeout_secs),
            connect_timeout: Duration::from_secs(self.session.connect_timeout_secs),
            reconnect: self.reconnect_policy(),
            offline_queue_capacity: self.session.offline_queue_capacity,
            presence: self.presence(),
        }
    }

    /// None when reminders are disabled
    pub fn reminder_schedule(&self) -> Option<ReminderSchedule> {
        self.reminders.enabled.then(|| ReminderSchedule {
            topic: self.topics.reminder.clone(),
            interval: Duration::from_secs(self.reminders.interval_secs),
            priority: self.reminders.priority,
            qos: self.reminders.qos,
        })
    }

    /// Copy with the inline password replaced, for display
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.broker.password.is_some() {
            config.broker.password = Some(Secret::new(REDACTED));
        }
        config
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
host = "broker.example.com"
username = "device"
password = "hunter2"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
