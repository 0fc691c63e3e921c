//! Mock implementations for testing
//!
//! [`MockConnector`] is an in-memory broker: it records every link operation,
//! answers handshakes from a script, acknowledges publishes and subscriptions
//! on its own (or leaves them to the test), and can inject inbound messages and
//! transport drops.

use crate::error::ConnectError;
use crate::protocol::{Message, QoS};
use crate::transport::{
    BrokerConnection, BrokerConnector, BrokerLink, ConnectParams, InboundFrame, LinkError,
};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

const INBOUND_CAPACITY: usize = 256;

/// One operation observed by the mock broker
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOp {
    Connect {
        client_id: String,
        keepalive: Duration,
        has_last_will: bool,
    },
    Subscribe {
        request_id: u64,
        topic: String,
        qos: QoS,
    },
    Publish {
        request_id: u64,
        message: Message,
    },
    Disconnect,
}

struct LiveLink {
    generation: u64,
    frames: mpsc::Sender<InboundFrame>,
}

struct BrokerState {
    ops: Vec<LinkOp>,
    connect_script: VecDeque<Result<(), ConnectError>>,
    connect_attempts: u32,
    last_params: Option<ConnectParams>,
    auto_ack_publishes: bool,
    auto_ack_subscribes: bool,
    rejected_topics: HashSet<String>,
    generation: u64,
    live: Option<LiveLink>,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            ops: Vec::new(),
            connect_script: VecDeque::new(),
            connect_attempts: 0,
            last_params: None,
            auto_ack_publishes: true,
            auto_ack_subscribes: true,
            rejected_topics: HashSet::new(),
            generation: 0,
            live: None,
        }
    }
}

impl BrokerState {
    /// Push a frame to the live link of `generation`
    fn send(&self, generation: u64, frame: InboundFrame) -> bool {
        match &self.live {
            Some(live) if live.generation == generation => live.frames.try_send(frame).is_ok(),
            _ => false,
        }
    }

    fn send_current(&self, frame: InboundFrame) -> bool {
        self.send(self.generation, frame)
    }

    fn is_live(&self, generation: u64) -> bool {
        matches!(&self.live, Some(live) if live.generation == generation)
    }
}

/// In-memory broker for driving a [`crate::session::SessionManager`] in tests
///
/// Clones share the same broker, so a test can keep one clone while the
/// session owns another.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<BrokerState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue handshake outcomes; once the script runs out every handshake succeeds
    pub fn script_connects<I>(&self, outcomes: I)
    where
        I: IntoIterator<Item = Result<(), ConnectError>>,
    {
        self.lock().connect_script.extend(outcomes);
    }

    /// Fail the next `count` handshakes with `error`
    pub fn fail_next_connects(&self, count: usize, error: ConnectError) {
        self.script_connects(std::iter::repeat(Err(error)).take(count));
    }

    pub fn set_auto_ack_publishes(&self, enabled: bool) {
        self.lock().auto_ack_publishes = enabled;
    }

    pub fn set_auto_ack_subscribes(&self, enabled: bool) {
        self.lock().auto_ack_subscribes = enabled;
    }

    /// Answer subscriptions to `topic` with a failure return code
    pub fn reject_subscriptions_to(&self, topic: &str) {
        self.lock().rejected_topics.insert(topic.to_string());
    }

    pub fn accept_subscriptions_to(&self, topic: &str) {
        self.lock().rejected_topics.remove(topic);
    }

    /// Deliver an inbound message on the live link
    pub fn deliver(&self, message: Message) -> bool {
        self.lock().send_current(InboundFrame::Message(message))
    }

    /// Acknowledge publish `request_id` on the live link
    pub fn ack_publish(&self, request_id: u64) -> bool {
        self.lock()
            .send_current(InboundFrame::PublishAcked { request_id })
    }

    pub fn ack_subscribe(&self, request_id: u64, accepted: bool) -> bool {
        self.lock().send_current(InboundFrame::SubscribeAcked {
            request_id,
            accepted,
        })
    }

    /// Simulate the transport dropping. Returns false if nothing was connected.
    pub fn drop_connection(&self, reason: &str) -> bool {
        let mut state = self.lock();
        let Some(live) = state.live.take() else {
            return false;
        };
        live.frames
            .try_send(InboundFrame::ConnectionLost {
                reason: reason.to_string(),
            })
            .is_ok()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().live.is_some()
    }

    /// Handshakes attempted so far, successful or not
    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub fn last_connect_params(&self) -> Option<ConnectParams> {
        self.lock().last_params.clone()
    }

    pub fn operations(&self) -> Vec<LinkOp> {
        self.lock().ops.clone()
    }

    pub fn clear_operations(&self) {
        self.lock().ops.clear();
    }

    /// Every message handed to a link, in order
    pub fn published(&self) -> Vec<Message> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                LinkOp::Publish { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Published messages on one topic
    pub fn published_to(&self, topic: &str) -> Vec<Message> {
        self.published()
            .into_iter()
            .filter(|message| message.topic == topic)
            .collect()
    }

    /// Topic filters of every subscribe request, in order
    pub fn subscribe_requests(&self) -> Vec<String> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                LinkOp::Subscribe { topic, .. } => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn disconnect_count(&self) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| matches!(op, LinkOp::Disconnect))
            .count()
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<BrokerConnection, ConnectError> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        state.last_params = Some(params.clone());
        state.ops.push(LinkOp::Connect {
            client_id: params.client_id.clone(),
            keepalive: params.keepalive,
            has_last_will: params.last_will.is_some(),
        });

        if let Some(Err(e)) = state.connect_script.pop_front() {
            return Err(e);
        }

        state.generation += 1;
        let generation = state.generation;
        let (frames, inbound) = mpsc::channel(INBOUND_CAPACITY);
        state.live = Some(LiveLink { generation, frames });

        let link = MockLink {
            state: Arc::clone(&self.state),
            generation,
        };
        Ok(BrokerConnection {
            link: Arc::new(link),
            inbound,
        })
    }
}

/// Outbound half handed to the session by [`MockConnector`]
pub struct MockLink {
    state: Arc<Mutex<BrokerState>>,
    generation: u64,
}

impl MockLink {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BrokerLink for MockLink {
    async fn subscribe(&self, request_id: u64, topic: &str, qos: QoS) -> Result<(), LinkError> {
        let mut state = self.lock();
        if !state.is_live(self.generation) {
            return Err(LinkError::Closed);
        }
        state.ops.push(LinkOp::Subscribe {
            request_id,
            topic: topic.to_string(),
            qos,
        });
        if state.auto_ack_subscribes {
            let accepted = !state.rejected_topics.contains(topic);
            state.send(
                self.generation,
                InboundFrame::SubscribeAcked {
                    request_id,
                    accepted,
                },
            );
        }
        Ok(())
    }

    async fn publish(&self, request_id: u64, message: &Message) -> Result<(), LinkError> {
        let mut state = self.lock();
        if !state.is_live(self.generation) {
            return Err(LinkError::Closed);
        }
        state.ops.push(LinkOp::Publish {
            request_id,
            message: message.clone(),
        });
        if state.auto_ack_publishes && message.qos.requires_ack() {
            state.send(self.generation, InboundFrame::PublishAcked { request_id });
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        let mut state = self.lock();
        if !state.is_live(self.generation) {
            return Err(LinkError::Closed);
        }
        state.ops.push(LinkOp::Disconnect);
        state.live = None;
        Ok(())
    }
}
