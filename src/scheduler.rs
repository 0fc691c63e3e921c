//! Periodic publishing through a session
//!
//! A [`ScheduledPublisher`] owns one timer task. Every tick it builds a
//! payload, publishes it and hands the returned handle to its own task, so a
//! slow acknowledgement never delays the next tick.

use crate::protocol::{Message, QoS};
use crate::session::SessionManager;
use crate::transport::BrokerConnector;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

/// What a schedule publishes and how often
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub topic: String,
    pub interval: Duration,
    pub qos: QoS,
}

impl From<&crate::config::ReminderSchedule> for Schedule {
    fn from(reminders: &crate::config::ReminderSchedule) -> Self {
        Self {
            topic: reminders.topic.clone(),
            interval: reminders.interval,
            qos: reminders.qos,
        }
    }
}

/// Counters for one schedule
#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    acknowledged: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScheduleStats {
    /// Ticks that attempted a publish
    pub ticks: u64,
    /// Publishes the broker confirmed (qos 0 counts once handed over)
    pub acknowledged: u64,
    /// Publishes rejected, timed out or lost
    pub failed: u64,
}

/// Timer task publishing a fresh payload every interval
///
/// The first tick fires one full interval after [`ScheduledPublisher::start`].
/// Missed ticks are skipped rather than bunched up. Dropping the publisher
/// stops the timer.
pub struct ScheduledPublisher {
    task: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl ScheduledPublisher {
    /// Start publishing. `payload` receives the 1-based tick number.
    pub fn start<C, F>(session: Arc<SessionManager<C>>, schedule: Schedule, payload: F) -> Self
    where
        C: BrokerConnector,
        F: FnMut(u64) -> Vec<u8> + Send + 'static,
    {
        let counters = Arc::new(Counters::default());
        let span = crate::schedule_span!(topic = %schedule.topic, qos = ?schedule.qos);
        let task = tokio::spawn(
            run_schedule(session, schedule, payload, Arc::clone(&counters)).instrument(span),
        );
        Self {
            task: Some(task),
            counters,
        }
    }

    pub fn stats(&self) -> ScheduleStats {
        ScheduleStats {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            acknowledged: self.counters.acknowledged.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the timer. Acks already in flight still resolve.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            info!("Scheduled publisher stopped");
        }
    }
}

impl Drop for ScheduledPublisher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_schedule<C, F>(
    session: Arc<SessionManager<C>>,
    schedule: Schedule,
    mut payload: F,
    counters: Arc<Counters>,
) where
    C: BrokerConnector,
    F: FnMut(u64) -> Vec<u8> + Send + 'static,
{
    let period = schedule.interval.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await; // First tick completes immediately, skip it

    info!(
        interval_ms = period.as_millis() as u64,
        "Scheduled publisher started"
    );

    let mut sequence = 0u64;
    loop {
        interval.tick().await;
        sequence += 1;
        counters.ticks.fetch_add(1, Ordering::Relaxed);

        let message = Message::new(schedule.topic.clone(), payload(sequence), schedule.qos);
        match session.publish(message).await {
            Ok(handle) => {
                let counters = Arc::clone(&counters);
                tokio::spawn(
                    async move {
                        let id = handle.id();
                        match handle.wait().await {
                            Ok(()) => {
                                counters.acknowledged.fetch_add(1, Ordering::Relaxed);
                                debug!(id, sequence, "Scheduled publish delivered");
                            }
                            Err(e) => {
                                counters.failed.fetch_add(1, Ordering::Relaxed);
                                warn!(id, sequence, error = %e, "Scheduled publish not delivered");
                            }
                        }
                    }
                    .in_current_span(),
                );
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(sequence, error = %e, "Scheduled publish rejected");
            }
        }
    }
}
