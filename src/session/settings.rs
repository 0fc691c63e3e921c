//! Tunables for a session

use super::reconnect::ReconnectPolicy;
use crate::protocol::{Message, QoS, DEFAULT_STATUS_TOPIC};
use std::time::Duration;

/// Online/offline announcements on the status topic
#[derive(Debug, Clone, PartialEq)]
pub struct Presence {
    pub topic: String,
    pub online_payload: String,
    pub offline_payload: String,
}

impl Default for Presence {
    fn default() -> Self {
        Self {
            topic: DEFAULT_STATUS_TOPIC.to_string(),
            online_payload: "ItemReminder Client Online".to_string(),
            offline_payload: "ItemReminder Client Offline".to_string(),
        }
    }
}

impl Presence {
    pub fn online_message(&self) -> Message {
        Message::new(self.topic.clone(), self.online_payload.clone(), QoS::AtMostOnce)
    }

    pub fn offline_message(&self) -> Message {
        Message::new(self.topic.clone(), self.offline_payload.clone(), QoS::AtMostOnce)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub client_id: String,
    /// How long a qos >= 1 publish or a subscribe may wait for its ack
    pub ack_timeout: Duration,
    /// Upper bound for a single handshake
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Publishes parked while reconnecting; 0 disables queuing
    pub offline_queue_capacity: usize,
    /// None disables online/offline announcements and the last will
    pub presence: Option<Presence>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            client_id: format!("itemreminder-{}", uuid::Uuid::new_v4().simple()),
            ack_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            offline_queue_capacity: 0,
            presence: Some(Presence::default()),
        }
    }
}
