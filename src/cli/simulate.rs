//! `callgate simulate`
//!
//! Drives the coordinator against a scripted bridge so operators can watch
//! deduplication, retries, cascade suppression and channel recovery happen.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use callgate_core::{
    BridgeError, CoordinatorConfig, CoordinatorRuntime, EventBus, MockBridge, NetworkEventKind,
    RefreshBehavior, RequestOptions, Subscription,
};
use clap::Args;
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Endpoint called by the identical requests
    #[arg(long, default_value = "get_account")]
    pub endpoint: String,

    /// Failures the endpoint returns before it starts succeeding
    #[arg(long, default_value_t = 2)]
    pub failures: usize,

    /// Delay before the host announces the channel was refreshed
    #[arg(long, default_value_t = 500)]
    pub signal_after_ms: u64,

    /// Never announce the refresh, so recovery runs into the timeout
    #[arg(long, conflicts_with = "refresh_fails")]
    pub no_signal: bool,

    /// Reject the refresh command
    #[arg(long)]
    pub refresh_fails: bool,

    /// Identical requests issued at the same time
    #[arg(long, default_value_t = 3)]
    pub concurrency: usize,

    /// Requests to other endpoints, each failing once
    #[arg(long, default_value_t = 1)]
    pub unrelated: usize,

    /// Latency of every bridge call
    #[arg(long, default_value_t = 50)]
    pub latency_ms: u64,
}

/// Build a bridge that behaves as `args` describe.
pub fn scripted_bridge(args: &SimulateArgs) -> MockBridge {
    let bridge = MockBridge::new();
    bridge.set_latency(Duration::from_millis(args.latency_ms));

    bridge.push_failures(
        &args.endpoint,
        BridgeError::network("simulated transport failure"),
        args.failures,
    );
    bridge.set_fallback(&args.endpoint, Ok(json!({ "endpoint": args.endpoint, "ok": true })));

    for name in unrelated_endpoints(args.unrelated) {
        bridge.push_failures(&name, BridgeError::network("simulated transport failure"), 1);
        bridge.set_fallback(&name, Ok(json!({ "endpoint": name, "ok": true })));
    }

    let behavior = if args.refresh_fails {
        RefreshBehavior::Fail("simulated refresh rejection".to_string())
    } else if args.no_signal {
        RefreshBehavior::Never
    } else {
        RefreshBehavior::SignalAfter(Duration::from_millis(args.signal_after_ms))
    };
    bridge.set_refresh_behavior(behavior);

    bridge
}

fn unrelated_endpoints(count: usize) -> Vec<String> {
    (1..=count).map(|n| format!("unrelated_{n}")).collect()
}

fn log_events(bus: &EventBus) -> Vec<Subscription> {
    [
        NetworkEventKind::RequestRetry,
        NetworkEventKind::RequestFailed,
        NetworkEventKind::InboundRefreshing,
        NetworkEventKind::InboundRefreshed,
    ]
    .into_iter()
    .map(|kind| {
        bus.subscribe(kind, |event| {
            let payload = serde_json::to_string(event).unwrap_or_default();
            info!(kind = %event.kind(), payload = %payload, "Bus event");
        })
    })
    .collect()
}

pub async fn run(config: CoordinatorConfig, args: SimulateArgs) -> Result<()> {
    let bridge = scripted_bridge(&args);
    let runtime = CoordinatorRuntime::new(Arc::new(bridge.clone()), config);
    let coordinator = runtime.coordinator();
    let subscriptions = log_events(coordinator.event_bus());

    info!(
        endpoint = %args.endpoint,
        concurrency = args.concurrency,
        unrelated = args.unrelated,
        "Starting simulation"
    );
    let started = Instant::now();

    let identical = (0..args.concurrency).map(|_| {
        let coordinator = coordinator.clone();
        let endpoint = args.endpoint.clone();
        async move {
            let result = coordinator
                .request_value(&endpoint, json!({ "simulation": true }), RequestOptions::new())
                .await;
            (endpoint, result)
        }
    });

    // Unrelated calls start once the first attempt of the main endpoint has failed
    let unrelated_delay = Duration::from_millis(args.latency_ms + 1);
    let unrelated = unrelated_endpoints(args.unrelated).into_iter().map(|endpoint| {
        let coordinator = coordinator.clone();
        async move {
            tokio::time::sleep(unrelated_delay).await;
            let result = coordinator
                .request_value(&endpoint, Value::Null, RequestOptions::new())
                .await;
            (endpoint, result)
        }
    });

    let (identical, unrelated) = tokio::join!(join_all(identical), join_all(unrelated));
    let elapsed = started.elapsed();

    println!("\nOutcomes");
    for (endpoint, result) in identical.iter().chain(unrelated.iter()) {
        match result {
            Ok(value) => println!("  ✅ {endpoint}: {value}"),
            Err(e) => println!("  ❌ {endpoint}: {e}"),
        }
    }

    println!("\nBridge");
    println!("  {}: {} call(s)", args.endpoint, bridge.calls(&args.endpoint));
    for endpoint in unrelated_endpoints(args.unrelated) {
        println!("  {endpoint}: {} call(s)", bridge.calls(&endpoint));
    }
    println!("  refresh commands: {}", bridge.refresh_count());
    println!("  elapsed: {}ms", elapsed.as_millis());

    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    runtime.cleanup();
    Ok(())
}
