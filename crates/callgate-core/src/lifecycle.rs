//! Coordinator lifecycle
//!
//! The coordinator is created on first use and lives until [`CoordinatorRuntime::cleanup`].
//! While it lives, a forwarder task republishes every "channel refreshed"
//! signal from the bridge as an `InboundRefreshed` event, so observers also
//! learn about refreshes the host started on its own.
//!
//! ## Usage
//!
//! ```ignore
//! let runtime = CoordinatorRuntime::new(bridge, CoordinatorConfig::default());
//!
//! let account: Account = runtime
//!     .coordinator()
//!     .request("get_account", json!({}), RequestOptions::new())
//!     .await?;
//!
//! // On teardown
//! runtime.cleanup();
//! ```

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bridge::Bridge;
use crate::config::CoordinatorConfig;
use crate::coordinator::RequestCoordinator;
use crate::event_bus::{EventBus, NetworkEvent};

struct Instance {
    coordinator: RequestCoordinator,
    cancel: CancellationToken,
}

/// Owner of the process-wide coordinator instance
pub struct CoordinatorRuntime {
    bridge: Arc<dyn Bridge>,
    config: CoordinatorConfig,
    instance: Mutex<Option<Instance>>,
}

impl std::fmt::Debug for CoordinatorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorRuntime")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl CoordinatorRuntime {
    /// Create a runtime; nothing is started until the coordinator is first used.
    #[must_use]
    pub fn new(bridge: Arc<dyn Bridge>, config: CoordinatorConfig) -> Self {
        Self {
            bridge,
            config,
            instance: Mutex::new(None),
        }
    }

    /// The live coordinator, created on first call.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn coordinator(&self) -> RequestCoordinator {
        let mut instance = self.instance.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = instance.as_ref() {
            return existing.coordinator.clone();
        }

        let coordinator = RequestCoordinator::new(Arc::clone(&self.bridge), self.config.clone());
        let cancel = CancellationToken::new();
        spawn_forwarder(
            self.bridge.as_ref(),
            coordinator.event_bus().clone(),
            cancel.clone(),
        );
        info!("Request coordinator initialized");

        *instance = Some(Instance {
            coordinator: coordinator.clone(),
            cancel,
        });
        coordinator
    }

    /// Whether a coordinator instance is live
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.instance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Stop the forwarder and drop the instance. Safe to call repeatedly.
    ///
    /// Chains already running finish on their own. The next call to
    /// [`Self::coordinator`] starts a fresh instance with the configured defaults.
    /// Returns whether an instance was torn down.
    pub fn cleanup(&self) -> bool {
        let taken = self
            .instance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        match taken {
            Some(instance) => {
                instance.cancel.cancel();
                info!(
                    in_flight = instance.coordinator.in_flight_count(),
                    "Request coordinator cleaned up"
                );
                true
            }
            None => {
                debug!("Request coordinator cleanup with no live instance");
                false
            }
        }
    }
}

impl Drop for CoordinatorRuntime {
    fn drop(&mut self) {
        if let Some(instance) = self
            .instance
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            instance.cancel.cancel();
        }
    }
}

fn spawn_forwarder(bridge: &dyn Bridge, bus: EventBus, cancel: CancellationToken) {
    // Subscribed here so a signal arriving right after initialization is seen
    let mut refreshed = bridge.subscribe_refreshed();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                signal = refreshed.recv() => match signal {
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        bus.publish(NetworkEvent::inbound_refreshed(), None);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Channel refreshed forwarder stopped");
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::bridge::MockBridge;
    use crate::config::RequestOptions;
    use crate::event_bus::NetworkEventKind;

    fn runtime(bridge: &MockBridge) -> CoordinatorRuntime {
        CoordinatorRuntime::new(Arc::new(bridge.clone()), CoordinatorConfig::default())
    }

    fn count_refreshed(bus: &EventBus) -> Arc<AtomicUsize> {
        let counter = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&counter);
        let _ = bus.subscribe(NetworkEventKind::InboundRefreshed, move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        counter
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_created_lazily_and_shared() {
        let bridge = MockBridge::new();
        let runtime = runtime(&bridge);
        assert!(!runtime.is_initialized());
        assert_eq!(bridge.refreshed_listener_count(), 0);

        let first = runtime.coordinator();
        first.configure(&RequestOptions::new().max_retries(4));
        let second = runtime.coordinator();

        assert!(runtime.is_initialized());
        assert_eq!(second.config().max_retries, 4);
        assert_eq!(bridge.refreshed_listener_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_refresh_is_forwarded() {
        let bridge = MockBridge::new();
        let runtime = runtime(&bridge);
        let coordinator = runtime.coordinator();
        let refreshed = count_refreshed(coordinator.event_bus());

        bridge.signal_refreshed();
        tokio::time::sleep(Duration::from_millis(10)).await;
        bridge.signal_refreshed();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Forwarded events carry no dedup key
        assert_eq!(refreshed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_session_seen_by_gate_and_forwarder() {
        let bridge = MockBridge::new();
        let runtime = runtime(&bridge);
        let coordinator = runtime.coordinator();
        let refreshed = count_refreshed(coordinator.event_bus());

        assert_eq!(coordinator.refresh_gate().refresh().await, Ok(true));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(refreshed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_stops_forwarder() {
        let bridge = MockBridge::new();
        let runtime = runtime(&bridge);
        let coordinator = runtime.coordinator();
        let refreshed = count_refreshed(coordinator.event_bus());

        assert!(runtime.cleanup());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!runtime.is_initialized());
        assert_eq!(bridge.refreshed_listener_count(), 0);
        bridge.signal_refreshed();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(refreshed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_is_idempotent() {
        let bridge = MockBridge::new();
        let runtime = runtime(&bridge);

        assert!(!runtime.cleanup());
        let _ = runtime.coordinator();
        assert!(runtime.cleanup());
        assert!(!runtime.cleanup());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_instance_after_cleanup() {
        let bridge = MockBridge::new();
        let runtime = runtime(&bridge);

        runtime
            .coordinator()
            .configure(&RequestOptions::new().max_retries(5));
        runtime.cleanup();

        assert_eq!(runtime.coordinator().config().max_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_survives_cleanup() {
        let bridge = MockBridge::new();
        bridge.set_latency(Duration::from_millis(100));
        let runtime = runtime(&bridge);
        let coordinator = runtime.coordinator();

        let chain = tokio::spawn(async move {
            coordinator
                .request_value("get_account", serde_json::json!({}), RequestOptions::new())
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        runtime.cleanup();

        assert!(chain.await.unwrap().is_ok());
        assert_eq!(bridge.calls("get_account"), 1);
    }
}
