use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::*;
use crate::config::EventBusConfig;
use crate::types::RequestStatus;

fn retry_event(endpoint: &str, retry_count: u32) -> NetworkEvent {
    let mut status = RequestStatus::new(endpoint, 1);
    status.retry_count = retry_count;
    status.is_retrying = true;
    NetworkEvent::RequestRetry {
        status,
        delay_ms: 0,
    }
}

fn recorder(bus: &EventBus, kind: NetworkEventKind) -> (Subscription, Arc<Mutex<Vec<NetworkEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sub = bus.subscribe(kind, move |event| sink.lock().unwrap().push(event.clone()));
    (sub, seen)
}

#[tokio::test]
async fn test_publish_subscribe() {
    let bus = EventBus::default();
    let (_sub, seen) = recorder(&bus, NetworkEventKind::RequestRetry);

    let delivered = bus.publish(retry_event("get_account", 1), None);

    assert_eq!(delivered, 1);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].status().unwrap().endpoint, "get_account");
}

#[tokio::test]
async fn test_callbacks_only_receive_their_kind() {
    let bus = EventBus::default();
    let (_retry, retries) = recorder(&bus, NetworkEventKind::RequestRetry);
    let (_refreshed, refreshed) = recorder(&bus, NetworkEventKind::InboundRefreshed);

    bus.publish(NetworkEvent::inbound_refreshed(), None);

    assert!(retries.lock().unwrap().is_empty());
    assert_eq!(refreshed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_delivery_follows_subscription_order() {
    let bus = EventBus::default();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut subs = Vec::new();
    for n in 0..3 {
        let order = Arc::clone(&order);
        subs.push(bus.subscribe(NetworkEventKind::RequestFailed, move |_| {
            order.lock().unwrap().push(n)
        }));
    }

    bus.publish(
        NetworkEvent::RequestFailed {
            status: RequestStatus::new("get_usage", 1),
        },
        None,
    );

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(bus.subscriber_count(NetworkEventKind::RequestFailed), 3);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let bus = EventBus::default();
    let (sub, seen) = recorder(&bus, NetworkEventKind::RequestRetry);
    let (_other, other_seen) = recorder(&bus, NetworkEventKind::RequestRetry);

    bus.publish(retry_event("a", 1), None);
    sub.unsubscribe();
    bus.publish(retry_event("b", 1), None);

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(other_seen.lock().unwrap().len(), 2);
    assert_eq!(bus.subscriber_count(NetworkEventKind::RequestRetry), 1);
}

#[test]
fn test_publish_no_subscribers() {
    let bus = EventBus::default();
    // No subscribers, should not panic
    assert_eq!(bus.publish(NetworkEvent::inbound_refreshing(), None), 0);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_key_suppressed_within_window() {
    let bus = EventBus::default();
    let (_sub, seen) = recorder(&bus, NetworkEventKind::RequestRetry);

    assert_eq!(bus.publish(retry_event("get_account", 1), Some("get_account_retry_1")), 1);
    tokio::time::advance(Duration::from_millis(999)).await;
    assert_eq!(bus.publish(retry_event("get_account", 1), Some("get_account_retry_1")), 0);

    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_key_delivered_again_after_window() {
    let bus = EventBus::default();
    let (_sub, seen) = recorder(&bus, NetworkEventKind::RequestRetry);

    bus.publish(retry_event("get_account", 1), Some("get_account_retry_1"));
    tokio::time::advance(Duration::from_millis(1000)).await;
    bus.publish(retry_event("get_account", 1), Some("get_account_retry_1"));

    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_keys_are_independent() {
    let bus = EventBus::default();
    let (_sub, seen) = recorder(&bus, NetworkEventKind::RequestRetry);

    bus.publish(retry_event("get_account", 1), Some("get_account_retry_1"));
    bus.publish(retry_event("get_account", 2), Some("get_account_retry_2"));
    bus.publish(retry_event("get_account", 1), None);

    assert_eq!(seen.lock().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_dedup_records_are_pruned() {
    let bus = EventBus::default();

    for n in 0..100 {
        bus.publish(NetworkEvent::inbound_refreshing(), Some(format!("key_{n}").as_str()));
        tokio::time::advance(Duration::from_millis(1)).await;
    }
    assert_eq!(bus.dedup_records(), 100);

    bus.publish(NetworkEvent::inbound_refreshing(), Some("key_100"));
    assert_eq!(bus.dedup_records(), 51);

    // The oldest keys were evicted, so they are no longer suppressed
    let (_sub, seen) = recorder(&bus, NetworkEventKind::InboundRefreshing);
    bus.publish(NetworkEvent::inbound_refreshing(), Some("key_0"));
    bus.publish(NetworkEvent::inbound_refreshing(), Some("key_99"));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_custom_window() {
    let bus = EventBus::new(EventBusConfig {
        dedup_window_ms: 50,
        ..EventBusConfig::default()
    });
    let (_sub, seen) = recorder(&bus, NetworkEventKind::InboundRefreshed);

    bus.publish(NetworkEvent::inbound_refreshed(), Some("inbound_refreshed"));
    tokio::time::advance(Duration::from_millis(60)).await;
    bus.publish(NetworkEvent::inbound_refreshed(), Some("inbound_refreshed"));

    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_reentrant_publish_from_callback() {
    let bus = EventBus::default();
    let (_sub, failed) = recorder(&bus, NetworkEventKind::RequestFailed);

    let inner_bus = bus.clone();
    let _relay = bus.subscribe(NetworkEventKind::RequestRetry, move |event| {
        if let Some(status) = event.status() {
            inner_bus.publish(
                NetworkEvent::RequestFailed {
                    status: status.clone(),
                },
                None,
            );
        }
    });

    bus.publish(retry_event("get_account", 1), None);
    assert_eq!(failed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_stream_receives_events() {
    let bus = EventBus::default();
    let mut rx = bus.stream();

    let delivered = bus.publish(retry_event("get_account", 1), None);
    assert_eq!(delivered, 1);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.kind(), NetworkEventKind::RequestRetry);
}

#[test]
fn test_event_serialization() {
    let json = serde_json::to_string(&retry_event("get_account", 1)).unwrap();
    assert!(json.contains("\"type\":\"request_retry\""));
    assert!(json.contains("\"endpoint\":\"get_account\""));
    assert!(json.contains("\"retry_count\":1"));
}

#[test]
fn test_kind_wire_names() {
    assert_eq!(NetworkEventKind::RequestRetry.as_str(), "request-retry");
    assert_eq!(NetworkEventKind::RequestFailed.to_string(), "request-failed");
    assert_eq!(
        serde_json::to_string(&NetworkEventKind::InboundRefreshing).unwrap(),
        "\"inbound-refreshing\""
    );
    assert_eq!(NetworkEventKind::InboundRefreshed.as_str(), "inbound-refreshed");
}
