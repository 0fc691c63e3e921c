//! Impure I/O operations for the rumqttc transport
//!
//! One [`MqttConnector::connect`] call owns one rumqttc client and event loop.
//! After a failure the event loop is never polled again; the session asks the
//! connector for a fresh connection instead.

use super::connection::{configure_mqtt_options, map_connection_error, map_return_code, to_mqtt_qos};
use super::message_handler::{EventRoute, MessageHandler, RequestTracker};
use crate::error::ConnectError;
use crate::protocol::{Message, QoS};
use crate::transport::{
    BrokerConnection, BrokerConnector, BrokerLink, ConnectParams, InboundFrame, LinkError,
};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Packet};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long `disconnect` waits for the event pump to flush and stop
const PUMP_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Production connector over rumqttc (MQTT 3.1.1)
#[derive(Debug, Clone)]
pub struct MqttConnector {
    /// Capacity of rumqttc's request channel
    request_capacity: usize,
    /// Capacity of the inbound frame channel towards the session
    inbound_capacity: usize,
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self {
            request_capacity: 10,
            inbound_capacity: 64,
        }
    }
}

impl MqttConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacities(request_capacity: usize, inbound_capacity: usize) -> Self {
        Self {
            request_capacity: request_capacity.max(1),
            inbound_capacity: inbound_capacity.max(1),
        }
    }

    /// Poll until the broker answers the CONNECT
    async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), ConnectError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                    return match connack.code {
                        ConnectReturnCode::Success => Ok(()),
                        ref code => Err(map_return_code(code)),
                    };
                }
                Ok(event) => debug!(target: "mqtt_transport", "Pre-ConnAck event: {:?}", event),
                Err(e) => return Err(map_connection_error(&e)),
            }
        }
    }
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<BrokerConnection, ConnectError> {
        let mqtt_options = configure_mqtt_options(params);
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, self.request_capacity);

        Self::wait_for_connack(&mut event_loop).await?;
        info!(endpoint = %params.endpoint, client_id = %params.client_id, "Broker accepted connection");

        let tracker = Arc::new(StdMutex::new(RequestTracker::default()));
        let (frame_tx, frame_rx) = mpsc::channel(self.inbound_capacity);
        let pump = tokio::spawn(pump_events(event_loop, Arc::clone(&tracker), frame_tx));

        let link = MqttLink {
            client: Mutex::new(client),
            tracker,
            pump: StdMutex::new(Some(pump)),
        };
        Ok(BrokerConnection {
            link: Arc::new(link),
            inbound: frame_rx,
        })
    }
}

fn lock_tracker(tracker: &StdMutex<RequestTracker>) -> MutexGuard<'_, RequestTracker> {
    tracker
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drive the event loop and forward session-relevant frames
async fn pump_events(
    mut event_loop: EventLoop,
    tracker: Arc<StdMutex<RequestTracker>>,
    frames: mpsc::Sender<InboundFrame>,
) {
    loop {
        match event_loop.poll().await {
            Ok(event) => {
                let route = MessageHandler::route_mqtt_event(&event);
                if route == EventRoute::DisconnectSent {
                    debug!("Disconnect written, stopping event pump");
                    break;
                }

                let frame = lock_tracker(&tracker).translate(route);
                let Some(frame) = frame else {
                    continue;
                };
                let lost = matches!(frame, InboundFrame::ConnectionLost { .. });
                if frames.send(frame).await.is_err() {
                    debug!("Session released the link, stopping event pump");
                    break;
                }
                if lost {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "MQTT event loop error");
                let _ = frames
                    .send(InboundFrame::ConnectionLost {
                        reason: e.to_string(),
                    })
                    .await;
                break;
            }
        }
    }
    debug!(
        untracked = lock_tracker(&tracker).outstanding(),
        "MQTT event pump stopped"
    );
}

/// Outbound half of one rumqttc connection
pub struct MqttLink {
    /// Held across the tracker update and the client call so packet order
    /// matches tracker order
    client: Mutex<AsyncClient>,
    tracker: Arc<StdMutex<RequestTracker>>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn subscribe(&self, request_id: u64, topic: &str, qos: QoS) -> Result<(), LinkError> {
        let client = self.client.lock().await;
        lock_tracker(&self.tracker).expect_subscribe(request_id);

        if let Err(e) = client.subscribe(topic, to_mqtt_qos(qos)).await {
            lock_tracker(&self.tracker).forget_subscribe(request_id);
            return Err(LinkError::Request(Box::new(e)));
        }
        Ok(())
    }

    async fn publish(&self, request_id: u64, message: &Message) -> Result<(), LinkError> {
        let client = self.client.lock().await;
        lock_tracker(&self.tracker).expect_publish(request_id, message.qos);

        let result = client
            .publish(
                message.topic.clone(),
                to_mqtt_qos(message.qos),
                message.retain,
                message.payload.to_vec(),
            )
            .await;
        if let Err(e) = result {
            lock_tracker(&self.tracker).forget_publish(request_id);
            return Err(LinkError::Request(Box::new(e)));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        let result = {
            let client = self.client.lock().await;
            client.disconnect().await
        };

        let pump = self
            .pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(mut pump) = pump else {
            return Err(LinkError::Closed);
        };

        match tokio::time::timeout(PUMP_SHUTDOWN_GRACE, &mut pump).await {
            Ok(_) => debug!("Event pump finished"),
            Err(_) => {
                warn!("Event pump didn't stop in time, aborting");
                pump.abort();
            }
        }

        result.map_err(|e| LinkError::Request(Box::new(e)))
    }
}
