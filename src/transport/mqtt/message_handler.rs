//! Pure routing of rumqttc events into session frames
//!
//! rumqttc picks its own packet ids and only reveals them through outgoing
//! events, in the order requests were handed to the client. [`RequestTracker`]
//! relies on that order to map packet ids back to session request ids.

use super::connection::from_mqtt_qos;
use crate::protocol::{Message, QoS};
use crate::transport::InboundFrame;
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => {
                    let mut message = Message::new(
                        publish.topic.clone(),
                        publish.payload.clone(),
                        from_mqtt_qos(publish.qos),
                    );
                    message.retain = publish.retain;
                    EventRoute::MessageReceived(message)
                }
                Packet::PubAck(ack) => EventRoute::PublishCompleted { packet_id: ack.pkid },
                Packet::PubComp(comp) => EventRoute::PublishCompleted {
                    packet_id: comp.pkid,
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionAnswered {
                    packet_id: suback.pkid,
                    accepted: Self::subscription_accepted(&suback.return_codes),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Publish(packet_id)) => EventRoute::PublishSent {
                packet_id: *packet_id,
            },
            Event::Outgoing(Outgoing::Subscribe(packet_id)) => EventRoute::SubscribeSent {
                packet_id: *packet_id,
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// A SubAck is an acceptance only if no filter failed
    pub fn subscription_accepted(return_codes: &[SubscribeReasonCode]) -> bool {
        !return_codes.is_empty()
            && return_codes
                .iter()
                .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived(Message),
    /// PubAck (qos 1) or PubComp (qos 2)
    PublishCompleted { packet_id: u16 },
    SubscriptionAnswered { packet_id: u16, accepted: bool },
    /// A publish left the client; qos 0 carries packet id 0
    PublishSent { packet_id: u16 },
    SubscribeSent { packet_id: u16 },
    /// Broker closed the session
    Disconnected,
    /// Our own disconnect was written
    DisconnectSent,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Maps rumqttc packet ids to session request ids
#[derive(Debug, Default)]
pub struct RequestTracker {
    unsent_publishes: VecDeque<(u64, QoS)>,
    unsent_subscribes: VecDeque<u64>,
    inflight_publishes: HashMap<u16, u64>,
    inflight_subscribes: HashMap<u16, u64>,
}

impl RequestTracker {
    /// Record a publish about to be handed to the client
    pub fn expect_publish(&mut self, request_id: u64, qos: QoS) {
        self.unsent_publishes.push_back((request_id, qos));
    }

    pub fn expect_subscribe(&mut self, request_id: u64) {
        self.unsent_subscribes.push_back(request_id);
    }

    /// Drop a request the client refused to take
    pub fn forget_publish(&mut self, request_id: u64) {
        self.unsent_publishes.retain(|(id, _)| *id != request_id);
    }

    pub fn forget_subscribe(&mut self, request_id: u64) {
        self.unsent_subscribes.retain(|id| *id != request_id);
    }

    /// Number of requests whose completion is still outstanding
    pub fn outstanding(&self) -> usize {
        self.unsent_publishes.len()
            + self.unsent_subscribes.len()
            + self.inflight_publishes.len()
            + self.inflight_subscribes.len()
    }

    /// Turn a routed event into the frame the session understands
    pub fn translate(&mut self, route: EventRoute) -> Option<InboundFrame> {
        match route {
            EventRoute::MessageReceived(message) => Some(InboundFrame::Message(message)),
            EventRoute::PublishSent { packet_id } => {
                match self.unsent_publishes.pop_front() {
                    Some((request_id, qos)) if qos.requires_ack() => {
                        self.inflight_publishes.insert(packet_id, request_id);
                    }
                    Some(_) => {}
                    None => debug!(packet_id, "Outgoing publish with no tracked request"),
                }
                None
            }
            EventRoute::SubscribeSent { packet_id } => {
                match self.unsent_subscribes.pop_front() {
                    Some(request_id) => {
                        self.inflight_subscribes.insert(packet_id, request_id);
                    }
                    None => debug!(packet_id, "Outgoing subscribe with no tracked request"),
                }
                None
            }
            EventRoute::PublishCompleted { packet_id } => {
                match self.inflight_publishes.remove(&packet_id) {
                    Some(request_id) => Some(InboundFrame::PublishAcked { request_id }),
                    None => {
                        debug!(packet_id, "Ack for untracked packet id");
                        None
                    }
                }
            }
            EventRoute::SubscriptionAnswered {
                packet_id,
                accepted,
            } => match self.inflight_subscribes.remove(&packet_id) {
                Some(request_id) => Some(InboundFrame::SubscribeAcked {
                    request_id,
                    accepted,
                }),
                None => {
                    debug!(packet_id, "SubAck for untracked packet id");
                    None
                }
            },
            EventRoute::Disconnected => Some(InboundFrame::ConnectionLost {
                reason: "broker closed the connection".to_string(),
            }),
            EventRoute::InfrastructureEvent(event) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
                None
            }
            EventRoute::ConnectionAcknowledged
            | EventRoute::DisconnectSent
            | EventRoute::OutgoingEvent => None,
        }
    }
}
