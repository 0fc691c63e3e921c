//! Reconnection behavior against the in-memory broker
//!
//! Time is paused, so backoff delays elapse instantly but stay observable
//! through `tokio::time::Instant`.


use itemreminder_mqtt::error::{ConnectError, PublishError};
use itemreminder_mqtt::protocol::{Message, QoS};
use itemreminder_mqtt::session::{
    DisconnectReason, ReconnectPolicy, SessionState, StatusEvent, Subscription,
};
use itemreminder_mqtt::testing::{LinkOp, MockConnector};
use proptest::prelude::*;
use std::time::Duration;
use test_helpers::*;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_drop_reconnects_and_restores_subscription() {
    let connector = MockConnector::new();
    let (session, mut notifications) = connected_session(&connector).await;
    session.subscribe("cmd", QoS::AtLeastOnce).await.unwrap();

    assert!(connector.drop_connection("network flap"));

    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Reconnecting { attempt: 1 }
    );
    assert_eq!(next_status(&mut notifications).await, StatusEvent::Connected);
    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::SubscriptionRestored {
            topic: "cmd".to_string()
        }
    );
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(connector.subscribe_requests(), vec!["cmd", "cmd"]);
}

#[tokio::test(start_paused = true)]
async fn test_resubscription_preserves_registration_order() {
    let connector = MockConnector::new();
    let (session, mut notifications) = connected_session(&connector).await;
    session.subscribe("cmd", QoS::AtLeastOnce).await.unwrap();
    session.subscribe("devices/+/ack", QoS::AtMostOnce).await.unwrap();
    session.subscribe("alerts/#", QoS::ExactlyOnce).await.unwrap();
    // Re-registering keeps the original position and updates the qos
    session.subscribe("cmd", QoS::ExactlyOnce).await.unwrap();
    let before = session.subscriptions().await;

    connector.clear_operations();
    connector.drop_connection("network flap");
    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Reconnecting { attempt: 1 }
    );
    assert_eq!(next_status(&mut notifications).await, StatusEvent::Connected);
    for _ in 0..3 {
        assert!(matches!(
            next_status(&mut notifications).await,
            StatusEvent::SubscriptionRestored { .. }
        ));
    }

    assert_eq!(session.subscriptions().await, before);
    let reissued: Vec<Subscription> = connector
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            LinkOp::Subscribe { topic, qos, .. } => Some(Subscription { topic, qos }),
            _ => None,
        })
        .collect();
    assert_eq!(reissued, before);
    assert_eq!(
        before.iter().map(|s| s.topic.as_str()).collect::<Vec<_>>(),
        vec!["cmd", "devices/+/ack", "alerts/#"]
    );
}

const FILTERS: [&str; 5] = [
    "cmd",
    "devices/+/ack",
    "alerts/#",
    "itemreminder/command",
    "a/b/c",
];

/// Registry a sequence of accepted subscribes should leave behind
fn expected_registry(calls: &[(usize, QoS)]) -> Vec<Subscription> {
    let mut registry: Vec<Subscription> = Vec::new();
    for &(index, qos) in calls {
        match registry.iter_mut().find(|s| s.topic == FILTERS[index]) {
            Some(existing) => existing.qos = qos,
            None => registry.push(Subscription {
                topic: FILTERS[index].to_string(),
                qos,
            }),
        }
    }
    registry
}

fn qos_strategy() -> impl Strategy<Value = QoS> {
    prop_oneof![
        Just(QoS::AtMostOnce),
        Just(QoS::AtLeastOnce),
        Just(QoS::ExactlyOnce),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_reconnect_restores_any_subscribe_sequence(
        calls in prop::collection::vec((0usize..FILTERS.len(), qos_strategy()), 1..12)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        let (registered, restored, after, reissued) = runtime.block_on(async {
            let connector = MockConnector::new();
            let (session, mut notifications) = connected_session(&connector).await;
            for &(index, qos) in &calls {
                session.subscribe(FILTERS[index], qos).await.unwrap();
            }
            let registered = session.subscriptions().await;

            connector.clear_operations();
            connector.drop_connection("network flap");
            assert_eq!(
                next_status(&mut notifications).await,
                StatusEvent::Reconnecting { attempt: 1 }
            );
            assert_eq!(next_status(&mut notifications).await, StatusEvent::Connected);
            let mut restored = Vec::new();
            for _ in 0..registered.len() {
                match next_status(&mut notifications).await {
                    StatusEvent::SubscriptionRestored { topic } => restored.push(topic),
                    other => panic!("Unexpected event {other:?}"),
                }
            }

            let reissued: Vec<Subscription> = connector
                .operations()
                .into_iter()
                .filter_map(|op| match op {
                    LinkOp::Subscribe { topic, qos, .. } => Some(Subscription { topic, qos }),
                    _ => None,
                })
                .collect();
            (registered, restored, session.subscriptions().await, reissued)
        });

        prop_assert_eq!(&registered, &expected_registry(&calls));
        prop_assert_eq!(&after, &registered);
        prop_assert_eq!(&reissued, &registered);
        let topics: Vec<String> = registered.iter().map(|s| s.topic.clone()).collect();
        prop_assert_eq!(restored, topics);
    }
}

#[tokio::test(start_paused = true)]
async fn test_rejected_restore_drops_subscription() {
    let connector = MockConnector::new();
    let (session, mut notifications) = connected_session(&connector).await;
    session.subscribe("cmd", QoS::AtLeastOnce).await.unwrap();
    session.subscribe("revoked", QoS::AtLeastOnce).await.unwrap();

    connector.reject_subscriptions_to("revoked");
    connector.drop_connection("acl change");
    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Reconnecting { attempt: 1 }
    );
    assert_eq!(next_status(&mut notifications).await, StatusEvent::Connected);
    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::SubscriptionRestored {
            topic: "cmd".to_string()
        }
    );
    settle().await;

    let topics: Vec<String> = session
        .subscriptions()
        .await
        .into_iter()
        .map(|s| s.topic)
        .collect();
    assert_eq!(topics, vec!["cmd".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_presence_is_reannounced_after_reconnect() {
    let connector = MockConnector::new();
    let (_session, mut notifications) = connected_session(&connector).await;

    connector.drop_connection("network flap");
    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Reconnecting { attempt: 1 }
    );
    assert_eq!(next_status(&mut notifications).await, StatusEvent::Connected);
    settle().await;

    let online: Vec<_> = connector
        .published_to("itemreminder/status")
        .into_iter()
        .filter(|m| m.payload_str() == "ItemReminder Client Online")
        .collect();
    assert_eq!(online.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_between_failed_attempts() {
    let connector = MockConnector::new();
    let (_session, mut notifications) = connected_session(&connector).await;
    connector.fail_next_connects(3, ConnectError::NetworkUnreachable("refused".into()));

    let started = Instant::now();
    connector.drop_connection("broker down");

    let mut attempts = Vec::new();
    loop {
        match next_status(&mut notifications).await {
            StatusEvent::Reconnecting { attempt } => attempts.push((attempt, started.elapsed())),
            StatusEvent::Connected => break,
            other => panic!("Unexpected event {other:?}"),
        }
    }

    // Each event fires before its delay; the handshake follows the delay
    let numbers: Vec<u32> = attempts.iter().map(|(n, _)| *n).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    let offsets: Vec<u64> = attempts.iter().map(|(_, at)| at.as_secs()).collect();
    assert_eq!(offsets, vec![0, 1, 3, 7]);
    assert_eq!(started.elapsed().as_secs(), 15);
    assert_eq!(connector.connect_attempts(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_max_attempts_exhausted_gives_up() {
    let connector = MockConnector::new();
    let mut settings = test_settings();
    settings.reconnect = ReconnectPolicy {
        max_attempts: Some(3),
        ..ReconnectPolicy::default()
    };
    let (session, mut notifications) = new_session(&connector, settings);
    connect(&session, &mut notifications).await;
    connector.fail_next_connects(10, ConnectError::Timeout);

    let started = Instant::now();
    connector.drop_connection("broker gone");

    for attempt in 1..=3 {
        assert_eq!(
            next_status(&mut notifications).await,
            StatusEvent::Reconnecting { attempt }
        );
    }
    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Disconnected(DisconnectReason::ReconnectAttemptsExhausted { attempts: 3 })
    );

    assert_eq!(started.elapsed().as_secs(), 1 + 2 + 4);
    assert_eq!(connector.connect_attempts(), 1 + 3);
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.is_permanently_disconnected().await);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.connect_attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_auth_rejection_during_reconnect_stops_immediately() {
    let connector = MockConnector::new();
    connector.set_auto_ack_publishes(false);
    let (session, mut notifications) = connected_session(&connector).await;
    let handle = session
        .publish(Message::new("itemreminder/notification", "x", QoS::AtLeastOnce))
        .await
        .unwrap();
    connector.script_connects([Err(ConnectError::AuthRejected)]);

    connector.drop_connection("session taken over");

    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Reconnecting { attempt: 1 }
    );
    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Disconnected(DisconnectReason::AuthRejected)
    );
    assert_eq!(handle.wait().await, Err(PublishError::ConnectionLost));
    assert_eq!(session.pending_publishes().await, 0);
    assert!(session.is_permanently_disconnected().await);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.connect_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_young_pending_publish_survives_reconnect() {
    let connector = MockConnector::new();
    connector.set_auto_ack_publishes(false);
    let (session, mut notifications) = connected_session(&connector).await;
    let handle = session
        .publish(Message::new("itemreminder/notification", "x", QoS::AtLeastOnce))
        .await
        .unwrap();

    connector.drop_connection("network flap");
    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Reconnecting { attempt: 1 }
    );
    assert_eq!(next_status(&mut notifications).await, StatusEvent::Connected);
    assert_eq!(session.pending_publishes().await, 1);

    assert!(connector.ack_publish(handle.id()));
    assert_eq!(handle.wait().await, Ok(()));
}

#[tokio::test(start_paused = true)]
async fn test_pending_publish_expires_while_reconnecting() {
    let connector = MockConnector::new();
    connector.set_auto_ack_publishes(false);
    let (session, _notifications) = connected_session(&connector).await;
    let handle = session
        .publish(Message::new("itemreminder/notification", "x", QoS::AtLeastOnce))
        .await
        .unwrap();
    let id = handle.id();
    connector.fail_next_connects(10, ConnectError::Timeout);

    connector.drop_connection("broker down");

    assert_eq!(handle.wait().await, Err(PublishError::AckTimeout { id }));
    assert_eq!(session.state(), SessionState::Reconnecting);
    assert_eq!(session.pending_publishes().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_publish_while_reconnecting_without_queue_is_rejected() {
    let connector = MockConnector::new();
    let (session, mut notifications) = connected_session(&connector).await;

    connector.drop_connection("network flap");
    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Reconnecting { attempt: 1 }
    );

    let result = session
        .publish(Message::new("itemreminder/notification", "x", QoS::AtLeastOnce))
        .await;
    assert!(matches!(
        result,
        Err(PublishError::NotConnected {
            state: SessionState::Reconnecting
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_offline_queue_flushes_after_reconnect() {
    let connector = MockConnector::new();
    let mut settings = test_settings();
    settings.offline_queue_capacity = 2;
    let (session, mut notifications) = new_session(&connector, settings);
    connect(&session, &mut notifications).await;

    connector.drop_connection("network flap");
    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Reconnecting { attempt: 1 }
    );

    let first = session
        .publish(Message::new("itemreminder/notification", "a", QoS::AtLeastOnce))
        .await
        .unwrap();
    let second = session
        .publish(Message::new("itemreminder/notification", "b", QoS::AtMostOnce))
        .await
        .unwrap();
    let overflow = session
        .publish(Message::new("itemreminder/notification", "c", QoS::AtMostOnce))
        .await;
    assert!(matches!(overflow, Err(PublishError::QueueFull { capacity: 2 })));
    assert_eq!(session.queued_publishes().await, 2);

    assert_eq!(next_status(&mut notifications).await, StatusEvent::Connected);
    assert_eq!(first.wait().await, Ok(()));
    assert_eq!(second.wait().await, Ok(()));

    let flushed: Vec<String> = connector
        .published_to("itemreminder/notification")
        .iter()
        .map(|m| m.payload_str().into_owned())
        .collect();
    assert_eq!(flushed, vec!["a", "b"]);
    assert_eq!(session.queued_publishes().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_queued_publish_is_never_sent() {
    let connector = MockConnector::new();
    let mut settings = test_settings();
    settings.offline_queue_capacity = 4;
    let (session, mut notifications) = new_session(&connector, settings);
    connect(&session, &mut notifications).await;

    connector.drop_connection("network flap");
    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Reconnecting { attempt: 1 }
    );
    let mut handle = session
        .publish(Message::new("itemreminder/notification", "never", QoS::AtLeastOnce))
        .await
        .unwrap();
    assert!(handle.cancel().await);
    assert_eq!(session.queued_publishes().await, 0);

    assert_eq!(next_status(&mut notifications).await, StatusEvent::Connected);
    settle().await;
    assert!(connector.published_to("itemreminder/notification").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_queued_publish_times_out_while_reconnecting() {
    let connector = MockConnector::new();
    let mut settings = test_settings();
    settings.offline_queue_capacity = 4;
    let (session, mut notifications) = new_session(&connector, settings);
    connect(&session, &mut notifications).await;
    connector.fail_next_connects(1000, ConnectError::NetworkUnreachable("refused".into()));

    connector.drop_connection("broker down");
    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Reconnecting { attempt: 1 }
    );
    let started = Instant::now();
    let handle = session
        .publish(Message::new("itemreminder/notification", "stuck", QoS::AtLeastOnce))
        .await
        .unwrap();
    let id = handle.id();
    assert_eq!(session.queued_publishes().await, 1);

    let outcome = tokio::time::timeout(Duration::from_secs(600), handle.wait())
        .await
        .expect("queued publish should expire while the broker is away");
    assert_eq!(outcome, Err(PublishError::AckTimeout { id }));
    assert_eq!(started.elapsed().as_secs(), 10);
    assert_eq!(session.queued_publishes().await, 0);
    assert_eq!(session.state(), SessionState::Reconnecting);
}

#[tokio::test(start_paused = true)]
async fn test_flushed_publish_keeps_deadline_from_enqueue() {
    let connector = MockConnector::new();
    connector.set_auto_ack_publishes(false);
    let mut settings = test_settings();
    settings.offline_queue_capacity = 4;
    let (session, mut notifications) = new_session(&connector, settings);
    connect(&session, &mut notifications).await;
    connector.fail_next_connects(2, ConnectError::Timeout);

    connector.drop_connection("network flap");
    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Reconnecting { attempt: 1 }
    );
    let started = Instant::now();
    let handle = session
        .publish(Message::new("itemreminder/notification", "late", QoS::AtLeastOnce))
        .await
        .unwrap();
    let id = handle.id();

    loop {
        match next_status(&mut notifications).await {
            StatusEvent::Reconnecting { .. } => {}
            StatusEvent::Connected => break,
            other => panic!("Unexpected event {other:?}"),
        }
    }
    settle().await;
    assert_eq!(started.elapsed().as_secs(), 7);
    assert_eq!(connector.published_to("itemreminder/notification").len(), 1);
    assert_eq!(session.pending_publishes().await, 1);

    // Time spent in the queue counts against the ack timeout
    assert_eq!(handle.wait().await, Err(PublishError::AckTimeout { id }));
    assert_eq!(started.elapsed().as_secs(), 10);
    assert_eq!(session.pending_publishes().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_backoff_stops_reconnecting() {
    let connector = MockConnector::new();
    let (session, mut notifications) = connected_session(&connector).await;
    connector.fail_next_connects(100, ConnectError::Timeout);

    connector.drop_connection("broker down");
    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Reconnecting { attempt: 1 }
    );

    session.disconnect(true).await;

    assert_eq!(
        next_status(&mut notifications).await,
        StatusEvent::Disconnected(DisconnectReason::Requested)
    );
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.is_permanently_disconnected().await);
    assert_eq!(connector.disconnect_count(), 0);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_count_reconnects() {
    let connector = MockConnector::new();
    let (session, mut notifications) = connected_session(&connector).await;
    session.subscribe("cmd", QoS::AtLeastOnce).await.unwrap();

    for _ in 0..2 {
        connector.drop_connection("network flap");
        assert!(matches!(
            next_status(&mut notifications).await,
            StatusEvent::Reconnecting { .. }
        ));
        assert_eq!(next_status(&mut notifications).await, StatusEvent::Connected);
        assert!(matches!(
            next_status(&mut notifications).await,
            StatusEvent::SubscriptionRestored { .. }
        ));
    }

    let metrics = session.metrics().await;
    assert_eq!(metrics.reconnect_count, 2);
    assert_eq!(metrics.subscriptions, 1);
    assert!(metrics.is_healthy);
    assert_eq!(metrics.state, SessionState::Connected);
}
