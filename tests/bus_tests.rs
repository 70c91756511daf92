use std::time::Duration;

use serde_json::json;

use workbus::bus::memory::InMemoryBus;
use workbus::bus::{BusEvent, MessageBus};

#[tokio::test]
async fn test_publish_reaches_subscriber() {
    let bus = InMemoryBus::new();
    let mut sub = bus.subscribe("workers").await.unwrap();

    bus.publish("workers", "job", json!({"n": 1})).await.unwrap();

    match sub.recv().await {
        Some(BusEvent::Message {
            channel,
            event,
            payload,
        }) => {
            assert_eq!(channel, "workers");
            assert_eq!(event, "job");
            assert_eq!(payload["n"], 1);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_subscription_filters_by_channel() {
    let bus = InMemoryBus::new();
    let mut sub = bus.subscribe("workers").await.unwrap();
    let _other = bus.subscribe("other").await.unwrap();

    bus.publish("other", "job", json!("skip")).await.unwrap();
    bus.publish("workers", "job", json!("keep")).await.unwrap();

    match sub.recv().await {
        Some(BusEvent::Message { payload, .. }) => assert_eq!(payload, json!("keep")),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_publish_without_subscribers_succeeds() {
    let bus = InMemoryBus::new();
    bus.publish("workers", "job", json!({})).await.unwrap();
}

#[tokio::test]
async fn test_last_drop_vacates_channel() {
    let bus = InMemoryBus::new();
    let mut watcher = bus.watch("workers");

    let sub_a = bus.subscribe("workers").await.unwrap();
    let sub_b = bus.subscribe("workers").await.unwrap();
    assert_eq!(bus.occupancy("workers"), 2);

    drop(sub_a);
    assert_eq!(bus.occupancy("workers"), 1);

    drop(sub_b);
    assert_eq!(bus.occupancy("workers"), 0);

    let event = tokio::time::timeout(Duration::from_secs(1), watcher.recv())
        .await
        .expect("expected a vacated event");
    match event {
        Some(BusEvent::ChannelVacated { channel }) => assert_eq!(channel, "workers"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_watcher_does_not_count_toward_occupancy() {
    let bus = InMemoryBus::new();
    let _watcher = bus.watch("workers");
    assert_eq!(bus.occupancy("workers"), 0);

    let sub = bus.subscribe("workers").await.unwrap();
    assert_eq!(bus.occupancy("workers"), 1);
    drop(sub);
    assert_eq!(bus.occupancy("workers"), 0);
}

#[tokio::test]
async fn test_notify_vacated_reaches_watchers() {
    let bus = InMemoryBus::new();
    let mut watcher = bus.watch("workers");

    bus.notify_vacated("workers");

    match watcher.recv().await {
        Some(BusEvent::ChannelVacated { channel }) => assert_eq!(channel, "workers"),
        other => panic!("unexpected event: {other:?}"),
    }
}
