//! The session manager
//!
//! A [`SessionManager`] owns one logical connection to a broker. Caller
//! operations and a per-session supervisor task share a single state block
//! behind a `tokio::sync::Mutex`; the lock is never held across a transport
//! await. The supervisor reads inbound frames, resolves acknowledgements,
//! dispatches messages and drives reconnection when the transport drops.

use super::handle::PublishHandle;
use super::monitor::{SessionMetrics, SessionMonitor};
use super::observer::SessionObserver;
use super::reconnect::ReconnectionDecision;
use super::settings::{Presence, SessionSettings};
use super::state::{DisconnectReason, SessionState, StatusEvent};
use crate::error::{ConnectError, PublishError, SubscribeError};
use crate::protocol::{
    validate_topic_filter, validate_topic_name, Credentials, Endpoint, Message, QoS,
};
use crate::transport::{BrokerConnection, BrokerConnector, BrokerLink, ConnectParams, InboundFrame};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// How long `disconnect` waits for the supervisor before aborting it
const SUPERVISOR_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub(crate) type PublishOutcome = Result<(), PublishError>;

type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// A topic filter registered through [`SessionManager::subscribe`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub qos: QoS,
}

struct PendingPublish {
    message: Message,
    sent_at: Instant,
    waiter: oneshot::Sender<PublishOutcome>,
    expiry: JoinHandle<()>,
}

struct QueuedPublish {
    id: u64,
    message: Message,
    /// The ack timeout runs from here, not from the flush
    queued_at: Instant,
    waiter: oneshot::Sender<PublishOutcome>,
    expiry: JoinHandle<()>,
}

enum SubscribeWaiter {
    /// A caller is awaiting the SubAck
    Caller {
        topic: String,
        qos: QoS,
        reply: oneshot::Sender<Result<(), SubscribeError>>,
    },
    /// Re-issued by the supervisor after a reconnect
    Restore { topic: String },
    /// The caller gave up waiting; a late acceptance still registers the topic
    TimedOut { topic: String, qos: QoS },
}

struct SessionInner {
    state: SessionState,
    /// Bumped by every connect and disconnect; stale handshakes compare against it
    epoch: u64,
    target: Option<ConnectParams>,
    link: Option<Arc<dyn BrokerLink>>,
    /// Registration order is preserved for resubscription
    subscriptions: Vec<Subscription>,
    pending_publishes: HashMap<u64, PendingPublish>,
    pending_subscribes: HashMap<u64, SubscribeWaiter>,
    offline_queue: VecDeque<QueuedPublish>,
    message_handler: Option<MessageHandler>,
    supervisor: Option<JoinHandle<()>>,
    connected_since: Option<std::time::Instant>,
    reconnect_count: u32,
    gave_up: bool,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            epoch: 0,
            target: None,
            link: None,
            subscriptions: Vec::new(),
            pending_publishes: HashMap::new(),
            pending_subscribes: HashMap::new(),
            offline_queue: VecDeque::new(),
            message_handler: None,
            supervisor: None,
            connected_since: None,
            reconnect_count: 0,
            gave_up: false,
        }
    }

    fn register_subscription(&mut self, topic: String, qos: QoS) {
        match self.subscriptions.iter_mut().find(|s| s.topic == topic) {
            Some(existing) => existing.qos = qos,
            None => self.subscriptions.push(Subscription { topic, qos }),
        }
    }

    /// Fail every pending publish sent at least `max_age` ago
    fn expire_stale_publishes(&mut self, max_age: Duration) -> usize {
        let stale: Vec<u64> = self
            .pending_publishes
            .iter()
            .filter(|(_, pending)| pending.sent_at.elapsed() >= max_age)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            if let Some(pending) = self.pending_publishes.remove(id) {
                pending.expiry.abort();
                let _ = pending.waiter.send(Err(PublishError::AckTimeout { id: *id }));
            }
        }
        stale.len()
    }

    fn fail_subscribes(&mut self) {
        for (_, waiter) in self.pending_subscribes.drain() {
            if let SubscribeWaiter::Caller { reply, .. } = waiter {
                let _ = reply.send(Err(SubscribeError::ConnectionLost));
            }
        }
    }

    /// Fail everything in flight with `ConnectionLost`; returns how many operations failed
    fn fail_all(&mut self) -> usize {
        let mut failed = self.pending_subscribes.len();
        self.fail_subscribes();

        failed += self.pending_publishes.len() + self.offline_queue.len();
        for (_, pending) in self.pending_publishes.drain() {
            pending.expiry.abort();
            let _ = pending.waiter.send(Err(PublishError::ConnectionLost));
        }
        for queued in self.offline_queue.drain(..) {
            queued.expiry.abort();
            let _ = queued.waiter.send(Err(PublishError::ConnectionLost));
        }
        failed
    }
}

/// State shared between the manager, its supervisor, expiry timers and handles
pub(crate) struct Shared {
    inner: Mutex<SessionInner>,
    state_tx: watch::Sender<SessionState>,
    shutdown_tx: watch::Sender<bool>,
    next_id: AtomicU64,
    ack_timeout: Duration,
}

impl Shared {
    fn new(ack_timeout: Duration) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Mutex::new(SessionInner::new()),
            state_tx,
            shutdown_tx,
            next_id: AtomicU64::new(1),
            ack_timeout,
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn transition(&self, inner: &mut SessionInner, to: SessionState) {
        let from = inner.state;
        if from == to {
            return;
        }
        SessionMonitor::log_state_transition(from, to);
        inner.state = to;
        self.state_tx.send_replace(to);
    }

    /// Register a pending publish and arm its expiry timer
    ///
    /// The entry expires `ack_timeout` after `sent_at`, which lies in the
    /// past for publishes flushed from the offline queue.
    fn track_publish(
        self: &Arc<Self>,
        inner: &mut SessionInner,
        id: u64,
        message: Message,
        sent_at: Instant,
        waiter: oneshot::Sender<PublishOutcome>,
    ) {
        let session = Arc::downgrade(self);
        let deadline = sent_at + self.ack_timeout;
        let expiry = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(shared) = session.upgrade() {
                shared.expire_publish(id).await;
            }
        });

        inner.pending_publishes.insert(
            id,
            PendingPublish {
                message,
                sent_at,
                waiter,
                expiry,
            },
        );
    }

    /// Park a publish in the offline queue with the same expiry as a sent one
    fn queue_publish(
        self: &Arc<Self>,
        inner: &mut SessionInner,
        id: u64,
        message: Message,
        waiter: oneshot::Sender<PublishOutcome>,
    ) {
        let session = Arc::downgrade(self);
        let ack_timeout = self.ack_timeout;
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(ack_timeout).await;
            if let Some(shared) = session.upgrade() {
                shared.expire_queued(id).await;
            }
        });

        inner.offline_queue.push_back(QueuedPublish {
            id,
            message,
            queued_at: Instant::now(),
            waiter,
            expiry,
        });
    }

    async fn expire_queued(&self, id: u64) {
        let mut inner = self.inner.lock().await;
        let Some(position) = inner.offline_queue.iter().position(|q| q.id == id) else {
            return;
        };
        if let Some(queued) = inner.offline_queue.remove(position) {
            warn!(
                id,
                topic = %queued.message.topic,
                timeout_ms = self.ack_timeout.as_millis() as u64,
                "Queued publish not sent before the ack timeout"
            );
            let _ = queued.waiter.send(Err(PublishError::AckTimeout { id }));
        }
    }

    async fn expire_publish(&self, id: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(pending) = inner.pending_publishes.remove(&id) {
            warn!(
                id,
                topic = %pending.message.topic,
                timeout_ms = self.ack_timeout.as_millis() as u64,
                "Publish not acknowledged in time"
            );
            let _ = pending.waiter.send(Err(PublishError::AckTimeout { id }));
        }
    }

    async fn resolve_publish(&self, id: u64) {
        let mut inner = self.inner.lock().await;
        match inner.pending_publishes.remove(&id) {
            Some(pending) => {
                pending.expiry.abort();
                debug!(
                    id,
                    topic = %pending.message.topic,
                    elapsed_ms = pending.sent_at.elapsed().as_millis() as u64,
                    "Publish acknowledged"
                );
                let _ = pending.waiter.send(Ok(()));
            }
            None => debug!(id, "Ignoring ack for unknown, cancelled or expired publish"),
        }
    }

    async fn fail_publish(&self, id: u64, error: PublishError) {
        let mut inner = self.inner.lock().await;
        if let Some(pending) = inner.pending_publishes.remove(&id) {
            pending.expiry.abort();
            let _ = pending.waiter.send(Err(error));
        }
    }

    pub(crate) async fn cancel_publish(&self, id: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(pending) = inner.pending_publishes.remove(&id) {
            pending.expiry.abort();
            debug!(id, topic = %pending.message.topic, "Publish cancelled");
        } else if let Some(position) = inner.offline_queue.iter().position(|q| q.id == id) {
            if let Some(queued) = inner.offline_queue.remove(position) {
                queued.expiry.abort();
            }
            debug!(id, "Queued publish cancelled");
        }
    }
}

/// Everything the supervisor needs, kept alive by the manager and its tasks
struct SessionCore<C> {
    connector: C,
    settings: SessionSettings,
    observer: Arc<dyn SessionObserver>,
    shared: Arc<Shared>,
}

impl<C: BrokerConnector> SessionCore<C> {
    async fn handshake(&self, params: &ConnectParams) -> Result<BrokerConnection, ConnectError> {
        match tokio::time::timeout(self.settings.connect_timeout, self.connector.connect(params))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout),
        }
    }

    async fn establish(self: &Arc<Self>, params: ConnectParams) -> Result<(), ConnectError> {
        let epoch = {
            let mut inner = self.shared.inner.lock().await;
            if inner.state != SessionState::Disconnected {
                return Err(ConnectError::AlreadyActive { state: inner.state });
            }
            inner.epoch += 1;
            inner.gave_up = false;
            inner.target = Some(params.clone());
            self.shared.shutdown_tx.send_replace(false);
            self.shared.transition(&mut inner, SessionState::Connecting);
            inner.epoch
        };

        info!(
            endpoint = %params.endpoint,
            keepalive_secs = params.keepalive.as_secs(),
            "Connecting to broker"
        );
        let outcome = self.handshake(&params).await;

        let mut inner = self.shared.inner.lock().await;
        let still_current = inner.epoch == epoch && inner.state == SessionState::Connecting;
        let connection = match outcome {
            Ok(connection) => connection,
            Err(e) => {
                if still_current {
                    self.shared.transition(&mut inner, SessionState::Disconnected);
                }
                warn!(error = %e, "Connect failed");
                return Err(e);
            }
        };

        if !still_current {
            drop(inner);
            warn!("Session was shut down during the handshake");
            if let Err(e) = connection.link.disconnect().await {
                debug!(error = %e, "Closing abandoned link failed");
            }
            return Err(ConnectError::ConnectionLost);
        }

        let link = Arc::clone(&connection.link);
        inner.link = Some(connection.link);
        inner.connected_since = Some(std::time::Instant::now());
        self.shared.transition(&mut inner, SessionState::Connected);
        inner.supervisor = Some(self.spawn_supervisor(connection.inbound));
        drop(inner);

        self.observer.handle_status(&StatusEvent::Connected);
        self.announce_online(link.as_ref()).await;
        Ok(())
    }

    fn spawn_supervisor(self: &Arc<Self>, inbound: mpsc::Receiver<InboundFrame>) -> JoinHandle<()> {
        let span = crate::session_span!(task = "supervisor", client_id = %self.settings.client_id);
        tokio::spawn(Arc::clone(self).supervise(inbound).instrument(span))
    }

    async fn supervise(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundFrame>) {
        let mut shutdown_rx = self.shared.shutdown_tx.subscribe();
        debug!("Session supervisor started");

        loop {
            let stop = *shutdown_rx.borrow();
            if stop {
                break;
            }

            let frame = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => continue,
                frame = inbound.recv() => frame,
            };

            let lost_reason = match frame {
                Some(InboundFrame::Message(message)) => {
                    self.dispatch(message).await;
                    continue;
                }
                Some(InboundFrame::PublishAcked { request_id }) => {
                    self.shared.resolve_publish(request_id).await;
                    continue;
                }
                Some(InboundFrame::SubscribeAcked {
                    request_id,
                    accepted,
                }) => {
                    self.resolve_subscribe(request_id, accepted).await;
                    continue;
                }
                Some(InboundFrame::ConnectionLost { reason }) => reason,
                None => "inbound channel closed".to_string(),
            };

            match self.recover(lost_reason, &mut shutdown_rx).await {
                Some(next_inbound) => inbound = next_inbound,
                None => break,
            }
        }

        debug!("Session supervisor stopped");
    }

    async fn dispatch(&self, message: Message) {
        let handler = self.shared.inner.lock().await.message_handler.clone();
        debug!(
            topic = %message.topic,
            bytes = message.payload.len(),
            "Inbound message"
        );
        match handler {
            Some(handler) => handler(&message),
            None => self.observer.handle_message(&message),
        }
    }

    async fn resolve_subscribe(&self, id: u64, accepted: bool) {
        let mut inner = self.shared.inner.lock().await;
        match inner.pending_subscribes.remove(&id) {
            Some(SubscribeWaiter::Caller { topic, qos, reply }) => {
                if accepted {
                    info!(topic = %topic, qos = ?qos, "Subscribed");
                    inner.register_subscription(topic, qos);
                    let _ = reply.send(Ok(()));
                } else {
                    warn!(topic = %topic, "Broker rejected subscription");
                    let _ = reply.send(Err(SubscribeError::BrokerRejected { topic }));
                }
            }
            Some(SubscribeWaiter::Restore { topic }) => {
                if accepted {
                    drop(inner);
                    info!(topic = %topic, "Subscription restored");
                    self.observer
                        .handle_status(&StatusEvent::SubscriptionRestored { topic });
                } else {
                    warn!(topic = %topic, "Broker rejected restored subscription, dropping it");
                    inner.subscriptions.retain(|s| s.topic != topic);
                }
            }
            Some(SubscribeWaiter::TimedOut { topic, qos }) => {
                if accepted {
                    info!(topic = %topic, qos = ?qos, "Late SubAck, registering subscription");
                    inner.register_subscription(topic, qos);
                } else {
                    debug!(topic = %topic, "Late SubAck rejected a timed out subscribe");
                }
            }
            None => debug!(id, "Ignoring SubAck for unknown subscribe request"),
        }
    }

    /// Drive reconnection after the transport dropped
    ///
    /// Returns the inbound channel of the new connection, or None when the
    /// supervisor should stop.
    async fn recover(
        self: &Arc<Self>,
        reason: String,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<mpsc::Receiver<InboundFrame>> {
        let (target, epoch) = {
            let mut inner = self.shared.inner.lock().await;
            if inner.state != SessionState::Connected {
                return None;
            }
            let target = inner.target.clone()?;
            inner.link = None;
            inner.connected_since = None;
            inner.fail_subscribes();
            self.shared.transition(&mut inner, SessionState::Reconnecting);
            warn!(
                reason = %reason,
                pending_publishes = inner.pending_publishes.len(),
                "Broker connection lost"
            );
            (target, inner.epoch)
        };

        let policy = &self.settings.reconnect;
        let mut failed_attempts = 0u32;

        loop {
            let stop = *shutdown_rx.borrow();
            match policy.next_step(failed_attempts, stop) {
                ReconnectionDecision::Proceed { attempt, delay } => {
                    self.observer
                        .handle_status(&StatusEvent::Reconnecting { attempt });
                    let max_display = policy
                        .max_attempts
                        .map_or("∞".to_string(), |max| max.to_string());
                    info!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Attempting reconnection {}/{}",
                        attempt,
                        max_display
                    );

                    if !interruptible_sleep(shutdown_rx, delay).await {
                        return None;
                    }

                    let outcome = tokio::select! {
                        outcome = self.handshake(&target) => outcome,
                        _ = shutdown_requested(shutdown_rx) => {
                            info!("Shutdown signal received during handshake, aborting reconnection");
                            return None;
                        }
                    };

                    match outcome {
                        Ok(connection) => return self.resume(connection, epoch).await,
                        Err(e) if !e.is_retryable() => {
                            error!(attempt, error = %e, "Broker rejected credentials, giving up");
                            self.give_up(DisconnectReason::AuthRejected, epoch).await;
                            return None;
                        }
                        Err(e) => {
                            warn!(attempt, error = %e, "Reconnection attempt failed");
                            failed_attempts = attempt;
                        }
                    }
                }
                ReconnectionDecision::AbortShutdownRequested => {
                    info!("Shutdown signal received, stopping reconnection");
                    return None;
                }
                ReconnectionDecision::AbortMaxAttemptsExceeded => {
                    error!(attempts = failed_attempts, "Reconnection attempts exhausted");
                    self.give_up(
                        DisconnectReason::ReconnectAttemptsExhausted {
                            attempts: failed_attempts,
                        },
                        epoch,
                    )
                    .await;
                    return None;
                }
            }
        }
    }

    /// Install a fresh connection after a successful reconnect
    async fn resume(
        self: &Arc<Self>,
        connection: BrokerConnection,
        epoch: u64,
    ) -> Option<mpsc::Receiver<InboundFrame>> {
        let BrokerConnection { link, inbound } = connection;

        let (restores, queued) = {
            let mut inner = self.shared.inner.lock().await;
            if inner.epoch != epoch || inner.state != SessionState::Reconnecting {
                drop(inner);
                if let Err(e) = link.disconnect().await {
                    debug!(error = %e, "Closing abandoned link failed");
                }
                return None;
            }

            inner.link = Some(Arc::clone(&link));
            inner.connected_since = Some(std::time::Instant::now());
            inner.reconnect_count += 1;
            self.shared.transition(&mut inner, SessionState::Connected);

            let expired = inner.expire_stale_publishes(self.settings.ack_timeout);

            let mut restores = Vec::with_capacity(inner.subscriptions.len());
            for subscription in inner.subscriptions.clone() {
                let id = self.shared.next_id();
                inner.pending_subscribes.insert(
                    id,
                    SubscribeWaiter::Restore {
                        topic: subscription.topic.clone(),
                    },
                );
                restores.push((id, subscription));
            }
            let queued: Vec<QueuedPublish> = inner.offline_queue.drain(..).collect();

            info!(
                reconnect_count = inner.reconnect_count,
                expired,
                still_pending = inner.pending_publishes.len(),
                restoring = restores.len(),
                queued = queued.len(),
                "Session re-established"
            );
            (restores, queued)
        };

        self.observer.handle_status(&StatusEvent::Connected);

        let core = Arc::clone(self);
        tokio::spawn(
            async move { core.restore(link, restores, queued).await }.in_current_span(),
        );
        Some(inbound)
    }

    /// Announce presence, re-issue subscriptions in registration order, then flush the queue
    async fn restore(
        &self,
        link: Arc<dyn BrokerLink>,
        restores: Vec<(u64, Subscription)>,
        queued: Vec<QueuedPublish>,
    ) {
        self.announce_online(link.as_ref()).await;

        for (id, subscription) in restores {
            match link.subscribe(id, &subscription.topic, subscription.qos).await {
                Ok(()) => debug!(topic = %subscription.topic, "Re-issued subscription"),
                Err(e) => {
                    warn!(topic = %subscription.topic, error = %e, "Failed to re-issue subscription");
                    self.shared.inner.lock().await.pending_subscribes.remove(&id);
                }
            }
        }

        for item in queued {
            self.send_queued(link.as_ref(), item).await;
        }
    }

    async fn send_queued(&self, link: &dyn BrokerLink, item: QueuedPublish) {
        let QueuedPublish {
            id,
            message,
            queued_at,
            waiter,
            expiry,
        } = item;
        expiry.abort();
        if waiter.is_closed() {
            debug!(id, "Skipping queued publish whose handle is gone");
            return;
        }
        if queued_at.elapsed() >= self.settings.ack_timeout {
            debug!(id, topic = %message.topic, "Queued publish expired before the flush");
            let _ = waiter.send(Err(PublishError::AckTimeout { id }));
            return;
        }

        if message.qos.requires_ack() {
            {
                let mut inner = self.shared.inner.lock().await;
                self.shared
                    .track_publish(&mut inner, id, message.clone(), queued_at, waiter);
            }
            if let Err(e) = link.publish(id, &message).await {
                warn!(id, topic = %message.topic, error = %e, "Failed to flush queued publish");
                self.shared
                    .fail_publish(id, PublishError::ConnectionLost)
                    .await;
            }
        } else {
            let outcome = link.publish(id, &message).await.map_err(|e| {
                warn!(id, topic = %message.topic, error = %e, "Failed to flush queued publish");
                PublishError::ConnectionLost
            });
            let _ = waiter.send(outcome);
        }
    }

    async fn give_up(&self, reason: DisconnectReason, epoch: u64) {
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.epoch != epoch || inner.state != SessionState::Reconnecting {
                return;
            }
            inner.gave_up = true;
            let failed = inner.fail_all();
            if failed > 0 {
                warn!(failed, "Failed in-flight operations after giving up");
            }
            self.shared.transition(&mut inner, SessionState::Disconnected);
        }
        self.observer
            .handle_status(&StatusEvent::Disconnected(reason));
    }

    async fn announce_online(&self, link: &dyn BrokerLink) {
        if let Some(presence) = &self.settings.presence {
            self.announce(link, presence, presence.online_message()).await;
        }
    }

    async fn announce_offline(&self, link: &dyn BrokerLink) {
        if let Some(presence) = &self.settings.presence {
            self.announce(link, presence, presence.offline_message()).await;
        }
    }

    async fn announce(&self, link: &dyn BrokerLink, presence: &Presence, message: Message) {
        let id = self.shared.next_id();
        match link.publish(id, &message).await {
            Ok(()) => debug!(
                topic = %presence.topic,
                status = %message.payload_str(),
                "Published presence"
            ),
            Err(e) => warn!(topic = %presence.topic, error = %e, "Failed to publish presence"),
        }
    }

    async fn shutdown(&self, graceful: bool) {
        let (link, supervisor) = {
            let mut inner = self.shared.inner.lock().await;
            if matches!(
                inner.state,
                SessionState::Disconnected | SessionState::ShuttingDown
            ) {
                debug!(state = %inner.state, "Disconnect ignored");
                return;
            }
            inner.epoch += 1;
            inner.connected_since = None;
            self.shared.transition(&mut inner, SessionState::ShuttingDown);
            self.shared.shutdown_tx.send_replace(true);
            (inner.link.take(), inner.supervisor.take())
        };

        if let Some(link) = link {
            if graceful {
                self.announce_offline(link.as_ref()).await;
            }
            match link.disconnect().await {
                Ok(()) => debug!("Transport closed"),
                Err(e) => warn!(error = %e, "Transport did not close cleanly"),
            }
        }

        if let Some(mut handle) = supervisor {
            match tokio::time::timeout(SUPERVISOR_SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!("Session supervisor shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(error = %e, "Session supervisor ended with error")
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Session supervisor didn't stop in time, aborting");
                    handle.abort();
                }
            }
        }

        {
            let mut inner = self.shared.inner.lock().await;
            let failed = inner.fail_all();
            if failed > 0 {
                info!(failed, "Failed in-flight operations on disconnect");
            }
            self.shared.transition(&mut inner, SessionState::Disconnected);
        }

        self.observer
            .handle_status(&StatusEvent::Disconnected(DisconnectReason::Requested));
        info!("Session closed");
    }
}

/// Resolves once shutdown is requested (or the signal is gone)
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// Sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown_requested(shutdown_rx) => {
            info!("Shutdown signal received during reconnection delay, stopping");
            false
        }
    }
}

/// Reliable publish/subscribe session over one broker connection
///
/// All operations take `&self`; share the manager through an `Arc` to use it
/// from several tasks. Dropping the manager signals its supervisor to stop
/// without the graceful offline announcement.
pub struct SessionManager<C: BrokerConnector> {
    core: Arc<SessionCore<C>>,
}

impl<C: BrokerConnector> SessionManager<C> {
    pub fn new(connector: C, settings: SessionSettings, observer: Arc<dyn SessionObserver>) -> Self {
        let shared = Arc::new(Shared::new(settings.ack_timeout));
        Self {
            core: Arc::new(SessionCore {
                connector,
                settings,
                observer,
                shared,
            }),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.core.settings
    }

    pub fn connector(&self) -> &C {
        &self.core.connector
    }

    /// Connect and authenticate. On success the state is Connected and the
    /// observer has received [`StatusEvent::Connected`].
    pub async fn connect(
        &self,
        endpoint: Endpoint,
        credentials: Credentials,
        keepalive: Duration,
    ) -> Result<(), ConnectError> {
        let settings = &self.core.settings;
        let params = ConnectParams {
            endpoint,
            credentials,
            keepalive,
            client_id: settings.client_id.clone(),
            last_will: settings.presence.as_ref().map(Presence::offline_message),
        };
        let span = crate::session_span!(operation = "connect", client_id = %settings.client_id);
        self.core.establish(params).instrument(span).await
    }

    /// Subscribe and wait for the broker's SubAck
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), SubscribeError> {
        validate_topic_filter(topic)?;
        let shared = &self.core.shared;
        let id = shared.next_id();
        let (reply, outcome) = oneshot::channel();

        let link = {
            let mut inner = shared.inner.lock().await;
            let state = inner.state;
            if !SessionMonitor::can_subscribe(state) {
                return Err(SubscribeError::NotConnected { state });
            }
            let Some(link) = inner.link.clone() else {
                return Err(SubscribeError::NotConnected { state });
            };
            inner.pending_subscribes.insert(
                id,
                SubscribeWaiter::Caller {
                    topic: topic.to_string(),
                    qos,
                    reply,
                },
            );
            link
        };

        if let Err(e) = link.subscribe(id, topic, qos).await {
            warn!(topic, error = %e, "Transport refused subscribe");
            shared.inner.lock().await.pending_subscribes.remove(&id);
            return Err(SubscribeError::ConnectionLost);
        }

        match tokio::time::timeout(self.core.settings.ack_timeout, outcome).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SubscribeError::ConnectionLost),
            Err(_) => {
                let mut inner = shared.inner.lock().await;
                // Keep the request id so a late SubAck is not mistaken for an unknown one
                if let Some(SubscribeWaiter::Caller { topic, qos, .. }) =
                    inner.pending_subscribes.remove(&id)
                {
                    inner
                        .pending_subscribes
                        .insert(id, SubscribeWaiter::TimedOut { topic, qos });
                }
                warn!(topic, "No SubAck received in time");
                Err(SubscribeError::AckTimeout)
            }
        }
    }

    /// Publish a message
    ///
    /// qos 0 returns an already completed handle. For qos >= 1 the handle
    /// resolves on the broker's ack or fails with `AckTimeout`.
    pub async fn publish(&self, message: Message) -> Result<PublishHandle, PublishError> {
        validate_topic_name(&message.topic)?;
        let shared = &self.core.shared;
        let id = shared.next_id();
        let qos = message.qos;

        let mut inner = shared.inner.lock().await;
        let state = inner.state;
        if !SessionMonitor::can_publish(state) {
            let capacity = self.core.settings.offline_queue_capacity;
            if !SessionMonitor::can_queue(state, capacity) {
                debug!(topic = %message.topic, state = %state, "Publish rejected, not connected");
                return Err(PublishError::NotConnected { state });
            }
            if inner.offline_queue.len() >= capacity {
                return Err(PublishError::QueueFull { capacity });
            }

            let (waiter, receiver) = oneshot::channel();
            shared.queue_publish(&mut inner, id, message, waiter);
            debug!(id, queued = inner.offline_queue.len(), "Queued publish until reconnected");
            return Ok(PublishHandle::pending(id, qos, receiver, Arc::downgrade(shared)));
        }

        let Some(link) = inner.link.clone() else {
            return Err(PublishError::NotConnected { state });
        };
        let receiver = if qos.requires_ack() {
            let (waiter, receiver) = oneshot::channel();
            shared.track_publish(&mut inner, id, message.clone(), Instant::now(), waiter);
            Some(receiver)
        } else {
            None
        };
        drop(inner);

        if let Err(e) = link.publish(id, &message).await {
            warn!(id, topic = %message.topic, error = %e, "Transport refused publish");
            if receiver.is_some() {
                shared.fail_publish(id, PublishError::ConnectionLost).await;
            }
            return Err(PublishError::ConnectionLost);
        }

        debug!(
            id,
            topic = %message.topic,
            qos = ?qos,
            bytes = message.payload.len(),
            "Published"
        );
        Ok(match receiver {
            Some(receiver) => PublishHandle::pending(id, qos, receiver, Arc::downgrade(shared)),
            None => PublishHandle::completed(id, qos),
        })
    }

    /// Register the inbound message callback, replacing any previous one
    ///
    /// While set, inbound messages go here instead of the observer.
    pub async fn on_message<F>(&self, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.core.shared.inner.lock().await.message_handler = Some(Arc::new(handler));
    }

    /// Route inbound messages back to the observer
    pub async fn clear_message_handler(&self) {
        self.core.shared.inner.lock().await.message_handler = None;
    }

    /// Close the session. A second call is a no-op.
    ///
    /// With `graceful` and a live transport, the presence offline message is
    /// published before the transport closes.
    pub async fn disconnect(&self, graceful: bool) {
        let span = crate::session_span!(
            operation = "disconnect",
            client_id = %self.core.settings.client_id,
            graceful
        );
        self.core.shutdown(graceful).instrument(span).await
    }

    pub fn state(&self) -> SessionState {
        *self.core.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.core.shared.state_tx.subscribe()
    }

    /// Registered subscriptions in registration order
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.core.shared.inner.lock().await.subscriptions.clone()
    }

    /// Number of qos >= 1 publishes awaiting acknowledgement
    pub async fn pending_publishes(&self) -> usize {
        self.core.shared.inner.lock().await.pending_publishes.len()
    }

    pub async fn queued_publishes(&self) -> usize {
        self.core.shared.inner.lock().await.offline_queue.len()
    }

    /// Whether reconnection gave up (attempts exhausted or credentials rejected)
    pub async fn is_permanently_disconnected(&self) -> bool {
        self.core.shared.inner.lock().await.gave_up
    }

    pub async fn metrics(&self) -> SessionMetrics {
        let inner = self.core.shared.inner.lock().await;
        SessionMonitor::calculate_metrics(
            inner.state,
            inner.connected_since,
            inner.reconnect_count,
            inner.pending_publishes.len(),
            inner.subscriptions.len(),
        )
    }
}

impl<C: BrokerConnector> Drop for SessionManager<C> {
    fn drop(&mut self) {
        self.core.shared.shutdown_tx.send_replace(true);
    }
}
