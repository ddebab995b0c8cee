use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;

use super::*;
use crate::bridge::{MockBridge, RefreshBehavior};
use crate::event_bus::NetworkEventKind;

fn gate_with(bridge: &MockBridge, bus: &EventBus) -> Arc<ChannelRefreshGate> {
    Arc::new(ChannelRefreshGate::new(
        Arc::new(bridge.clone()),
        bus.clone(),
        &RefreshConfig::default(),
    ))
}

fn record_kinds(bus: &EventBus) -> Arc<Mutex<Vec<NetworkEventKind>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        NetworkEventKind::InboundRefreshing,
        NetworkEventKind::InboundRefreshed,
    ] {
        let sink = Arc::clone(&seen);
        // Subscriptions live as long as the bus in these tests
        let _ = bus.subscribe(kind, move |event| sink.lock().unwrap().push(event.kind()));
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn test_refresh_resolves_on_signal() {
    let bridge = MockBridge::new();
    bridge.set_refresh_behavior(RefreshBehavior::SignalAfter(Duration::from_millis(500)));
    let bus = EventBus::default();
    let seen = record_kinds(&bus);
    let gate = gate_with(&bridge, &bus);

    let started = Instant::now();
    assert_eq!(gate.refresh().await, Ok(true));

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(510));
    assert_eq!(bridge.refresh_count(), 1);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            NetworkEventKind::InboundRefreshing,
            NetworkEventKind::InboundRefreshed
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_refreshes_share_one_session() {
    let bridge = MockBridge::new();
    bridge.set_refresh_behavior(RefreshBehavior::SignalAfter(Duration::from_millis(200)));
    let bus = EventBus::default();
    let gate = gate_with(&bridge, &bus);

    let results = join_all((0..5).map(|_| {
        let gate = Arc::clone(&gate);
        async move { gate.refresh().await }
    }))
    .await;

    assert!(results.iter().all(|r| *r == Ok(true)));
    assert_eq!(bridge.refresh_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_times_out_without_signal() {
    let bridge = MockBridge::new();
    bridge.set_refresh_behavior(RefreshBehavior::Never);
    let gate = gate_with(&bridge, &EventBus::default());

    let started = Instant::now();
    let result = gate.refresh().await;
    let elapsed = started.elapsed();

    assert_eq!(result, Err(RefreshError::Timeout(Duration::from_secs(30))));
    assert!(elapsed >= Duration::from_millis(30_000));
    assert!(elapsed <= Duration::from_millis(30_050));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_waiters_share_timeout() {
    let bridge = MockBridge::new();
    bridge.set_refresh_behavior(RefreshBehavior::Never);
    let gate = gate_with(&bridge, &EventBus::default());

    let results = join_all((0..3).map(|_| {
        let gate = Arc::clone(&gate);
        async move { gate.refresh().await }
    }))
    .await;

    for result in results {
        assert!(matches!(result, Err(RefreshError::Timeout(_))));
    }
    assert_eq!(bridge.refresh_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_command_failure_rejects_immediately() {
    let bridge = MockBridge::new();
    bridge.set_refresh_behavior(RefreshBehavior::Fail("host rejected refresh".to_string()));
    let bus = EventBus::default();
    let seen = record_kinds(&bus);
    let gate = gate_with(&bridge, &bus);

    let started = Instant::now();
    let result = gate.refresh().await;

    assert_eq!(
        result,
        Err(RefreshError::Failed("host rejected refresh".to_string()))
    );
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(*seen.lock().unwrap(), vec![NetworkEventKind::InboundRefreshing]);
}

#[tokio::test(start_paused = true)]
async fn test_slot_cleared_after_settle() {
    let bridge = MockBridge::new();
    let gate = gate_with(&bridge, &EventBus::default());

    assert_eq!(gate.refresh().await, Ok(true));
    assert!(!gate.is_refreshing());
    assert_eq!(bridge.refreshed_listener_count(), 0);

    assert_eq!(gate.refresh().await, Ok(true));
    assert_eq!(bridge.refresh_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_slot_cleared_after_failure() {
    let bridge = MockBridge::new();
    bridge.set_refresh_behavior(RefreshBehavior::Fail("busy".to_string()));
    let gate = gate_with(&bridge, &EventBus::default());

    assert!(gate.refresh().await.is_err());
    assert!(!gate.is_refreshing());

    bridge.set_refresh_behavior(RefreshBehavior::SignalAfter(Duration::from_millis(10)));
    assert_eq!(gate.refresh().await, Ok(true));
    assert_eq!(bridge.refresh_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_is_refreshing_while_session_live() {
    let bridge = MockBridge::new();
    bridge.set_refresh_behavior(RefreshBehavior::SignalAfter(Duration::from_secs(2)));
    let gate = gate_with(&bridge, &EventBus::default());

    let waiter = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.refresh().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(gate.is_refreshing());

    assert_eq!(waiter.await.unwrap(), Ok(true));
    assert!(!gate.is_refreshing());
}

#[tokio::test(start_paused = true)]
async fn test_session_settles_when_waiter_dropped() {
    let bridge = MockBridge::new();
    bridge.set_refresh_behavior(RefreshBehavior::SignalAfter(Duration::from_secs(1)));
    let gate = gate_with(&bridge, &EventBus::default());

    let waiter = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.refresh().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    waiter.abort();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!gate.is_refreshing());
}

#[test]
fn test_default_timeout() {
    let gate = gate_with(&MockBridge::new(), &EventBus::default());
    assert_eq!(gate.timeout(), Duration::from_secs(30));
    assert!(!gate.is_refreshing());
}
