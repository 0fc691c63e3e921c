//! Reminder payloads published by the client and commands it receives

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reminder urgency as understood by the ItemReminder back-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        };
        f.write_str(name)
    }
}

/// Reminder notification body: `{"item": ..., "timestamp": ..., "priority": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub item: String,
    /// Unix seconds
    pub timestamp: i64,
    pub priority: Priority,
}

impl Reminder {
    pub fn new(item: impl Into<String>, priority: Priority) -> Self {
        Self {
            item: item.into(),
            timestamp: Utc::now().timestamp(),
            priority,
        }
    }

    /// The numbered example reminder the demo client emits on each tick
    pub fn example(sequence: u64, priority: Priority) -> Self {
        Self::new(format!("Example Item {sequence}"), priority)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// An inbound command. Devices send JSON, but plain text is accepted too.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Json(serde_json::Value),
    Text(String),
}

impl Command {
    pub fn parse(payload: &[u8]) -> Self {
        match serde_json::from_slice::<serde_json::Value>(payload) {
            Ok(value) => Command::Json(value),
            Err(_) => Command::Text(String::from_utf8_lossy(payload).into_owned()),
        }
    }

    /// The `action` field of a JSON command, if present
    pub fn action(&self) -> Option<&str> {
        match self {
            Command::Json(value) => value.get("action").and_then(|a| a.as_str()),
            Command::Text(_) => None,
        }
    }
}
