//! RequestCoordinator - single-flight requests with bounded retry and
//! coordinated channel recovery.
//!
//! A call chain goes through these steps:
//!
//! ```text
//! request() ─► in flight? ──yes──► await shared outcome
//!                 │ no
//!                 ▼
//!        invoke bridge ──ok──► done
//!                 │ err
//!                 ▼
//!   another endpoint recovering? ──yes──► fail fast
//!                 │ no
//!                 ▼
//!       retries left? ──yes──► RequestRetry, invoke again
//!                 │ no
//!                 ▼
//!   RequestFailed, refresh channel ──ok──► one direct invoke
//!                 │ err
//!                 ▼
//!         original failure
//! ```
//!
//! Only one endpoint may be retrying or refreshing at any moment. The
//! coordination token is taken at the first retry and held until the chain
//! has fully settled, including the refresh and the attempt after it.

mod token;

use std::sync::{Arc, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bridge::Bridge;
use crate::config::{CoordinatorConfig, InvocationConfig, RequestOptions};
use crate::error::{BridgeError, CoordinatorError, Result};
use crate::event_bus::{EventBus, NetworkEvent};
use crate::refresh_gate::ChannelRefreshGate;
use crate::types::{RequestKey, RequestStatus};

use token::{enter_recovery, CoordinationToken, TokenGuard};
pub use token::{RecoveryOwner, RecoveryPhase};

type SharedOutcome = Shared<BoxFuture<'static, Result<Value>>>;

struct InFlight {
    request_id: Uuid,
    outcome: SharedOutcome,
}

struct CoordinatorState {
    defaults: RwLock<InvocationConfig>,
    in_flight: DashMap<RequestKey, InFlight>,
    active: DashMap<Uuid, RequestStatus>,
    token: Arc<CoordinationToken>,
}

/// Removes a chain from the in-flight map and the active set on every exit path.
struct ChainCleanup {
    state: Arc<CoordinatorState>,
    key: RequestKey,
    request_id: Uuid,
}

impl Drop for ChainCleanup {
    fn drop(&mut self) {
        self.state.active.remove(&self.request_id);
        self.state
            .in_flight
            .remove_if(&self.key, |_, entry| entry.request_id == self.request_id);
    }
}

/// Coordinates every call going through the bridge.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RequestCoordinator {
    bridge: Arc<dyn Bridge>,
    bus: EventBus,
    gate: Arc<ChannelRefreshGate>,
    state: Arc<CoordinatorState>,
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("defaults", &self.config())
            .field("in_flight", &self.in_flight_count())
            .field("recovery_owner", &self.recovery_owner())
            .field("gate", &self.gate)
            .finish()
    }
}

impl RequestCoordinator {
    /// Create a coordinator with its own event bus and refresh gate.
    #[must_use]
    pub fn new(bridge: Arc<dyn Bridge>, config: CoordinatorConfig) -> Self {
        let bus = EventBus::new(config.events.clone());
        let gate = Arc::new(ChannelRefreshGate::new(
            Arc::clone(&bridge),
            bus.clone(),
            &config.refresh,
        ));

        Self {
            bridge,
            bus,
            gate,
            state: Arc::new(CoordinatorState {
                defaults: RwLock::new(config.invocation),
                in_flight: DashMap::new(),
                active: DashMap::new(),
                token: Arc::new(CoordinationToken::default()),
            }),
        }
    }

    /// Event bus carrying this coordinator's status events.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Refresh gate used after exhausted retries.
    #[must_use]
    pub fn refresh_gate(&self) -> &ChannelRefreshGate {
        &self.gate
    }

    /// Current process-wide call defaults.
    #[must_use]
    pub fn config(&self) -> InvocationConfig {
        self.state
            .defaults
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Merge `options` into the process-wide defaults.
    ///
    /// Chains already running keep the configuration they started with.
    pub fn configure(&self, options: &RequestOptions) {
        let mut defaults = self
            .state
            .defaults
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *defaults = defaults.merged(options);
        info!(defaults = ?&*defaults, "Coordinator defaults updated");
    }

    /// Statuses of live chains that are currently retrying.
    #[must_use]
    pub fn active_retries(&self) -> Vec<RequestStatus> {
        self.state
            .active
            .iter()
            .filter(|entry| entry.is_retrying)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Statuses of all live chains.
    #[must_use]
    pub fn active_requests(&self) -> Vec<RequestStatus> {
        self.state
            .active
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of distinct calls currently in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.state.in_flight.len()
    }

    /// Endpoint and phase currently allowed to recover, if any.
    #[must_use]
    pub fn recovery_owner(&self) -> Option<RecoveryOwner> {
        self.state.token.holder()
    }

    /// Call `endpoint` and decode the result into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Value,
        options: RequestOptions,
    ) -> Result<T> {
        let value = self.request_value(endpoint, params, options).await?;
        serde_json::from_value(value).map_err(|e| CoordinatorError::Decode {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }

    /// Call `endpoint` and return the raw result.
    ///
    /// Concurrent calls with the same endpoint and parameters share one chain
    /// and receive the same outcome; `options` of joining callers are ignored.
    pub async fn request_value(
        &self,
        endpoint: &str,
        params: Value,
        options: RequestOptions,
    ) -> Result<Value> {
        let key = RequestKey::new(endpoint, &params);

        let outcome = match self.state.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                info!(key = %key, "Request already in flight, reusing it");
                entry.get().outcome.clone()
            }
            Entry::Vacant(entry) => {
                let config = self.config().merged(&options);
                let status = RequestStatus::new(endpoint, config.max_retries);
                let request_id = status.request_id;
                // Launched while the entry is held, so cleanup always finds it
                let outcome = self.launch(key, params, status, config);
                entry.insert(InFlight {
                    request_id,
                    outcome: outcome.clone(),
                });
                outcome
            }
        };

        outcome.await
    }

    fn launch(
        &self,
        key: RequestKey,
        params: Value,
        status: RequestStatus,
        config: InvocationConfig,
    ) -> SharedOutcome {
        let endpoint = status.endpoint.clone();
        let request_id = status.request_id;
        self.state.active.insert(request_id, status.clone());

        let this = self.clone();
        let handle = tokio::spawn(async move {
            let _cleanup = ChainCleanup {
                state: Arc::clone(&this.state),
                key,
                request_id,
            };
            this.execute_request(&params, status, &config).await
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                error!(endpoint = %endpoint, request_id = %request_id, error = %e, "Request task ended abnormally");
                Err(CoordinatorError::Aborted { endpoint })
            })
        }
        .boxed()
        .shared()
    }

    async fn execute_request(
        &self,
        params: &Value,
        mut status: RequestStatus,
        config: &InvocationConfig,
    ) -> Result<Value> {
        let endpoint = status.endpoint.clone();
        let endpoint = endpoint.as_str();
        // Held from the first retry until this chain returns
        let mut recovery: Option<TokenGuard> = None;

        loop {
            debug!(
                endpoint,
                request_id = %status.request_id,
                attempt = status.retry_count + 1,
                "Invoking bridge"
            );

            let err = match self.bridge.invoke(endpoint, params).await {
                Ok(value) => {
                    if status.retry_count > 0 {
                        info!(
                            endpoint,
                            request_id = %status.request_id,
                            retries = status.retry_count,
                            "Request succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            status.last_error = Some(err.message.clone());
            self.track(&status);
            warn!(
                endpoint,
                request_id = %status.request_id,
                kind = %err.kind,
                error = %err,
                "Request failed"
            );

            if let Some(owner) = self.state.token.conflicting_owner(endpoint) {
                warn!(
                    endpoint,
                    request_id = %status.request_id,
                    owner = %owner,
                    "Recovery in progress elsewhere, not retrying"
                );
                return Err(CoordinatorError::invocation(endpoint, err));
            }

            if status.can_retry() {
                if let Err(owner) = enter_recovery(
                    &self.state.token,
                    &mut recovery,
                    endpoint,
                    RecoveryPhase::Retry,
                ) {
                    warn!(endpoint, owner = %owner, "Recovery taken by another endpoint, not retrying");
                    return Err(CoordinatorError::invocation(endpoint, err));
                }

                status.retry_count += 1;
                status.is_retrying = true;
                self.track(&status);

                let delay = config.delay_for_retry(status.retry_count);
                warn!(
                    endpoint,
                    request_id = %status.request_id,
                    retry = status.retry_count,
                    max_retries = status.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying request"
                );

                if config.show_retry_notification {
                    self.bus.publish(
                        NetworkEvent::RequestRetry {
                            status: status.clone(),
                            delay_ms: delay.as_millis() as u64,
                        },
                        Some(format!("{endpoint}_retry_{}", status.retry_count).as_str()),
                    );
                }

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }

            status.is_retrying = false;
            self.track(&status);
            error!(
                endpoint,
                request_id = %status.request_id,
                max_retries = status.max_retries,
                "Request exhausted its retries"
            );
            self.bus.publish(
                NetworkEvent::RequestFailed {
                    status: status.clone(),
                },
                Some(format!("{endpoint}_failed").as_str()),
            );

            if !config.refresh_on_max_retries_exhausted {
                return Err(CoordinatorError::invocation(endpoint, err));
            }
            if self.gate.is_refreshing() {
                warn!(
                    endpoint,
                    request_id = %status.request_id,
                    "Channel refresh already running, not starting another"
                );
                return Err(CoordinatorError::invocation(endpoint, err));
            }
            if let Err(owner) = enter_recovery(
                &self.state.token,
                &mut recovery,
                endpoint,
                RecoveryPhase::Refresh,
            ) {
                warn!(endpoint, owner = %owner, "Recovery taken by another endpoint, not refreshing");
                return Err(CoordinatorError::invocation(endpoint, err));
            }

            return self.refresh_and_retry(endpoint, params, &mut status, err).await;
        }
    }

    /// Refresh the channel, then make exactly one direct attempt.
    ///
    /// A failed refresh surfaces `original`, never the refresh error.
    async fn refresh_and_retry(
        &self,
        endpoint: &str,
        params: &Value,
        status: &mut RequestStatus,
        original: BridgeError,
    ) -> Result<Value> {
        info!(endpoint, request_id = %status.request_id, "Refreshing channel after exhausted retries");

        if let Err(refresh_err) = self.gate.refresh().await {
            error!(
                endpoint,
                request_id = %status.request_id,
                error = %refresh_err,
                "Channel refresh failed"
            );
            return Err(CoordinatorError::invocation(endpoint, original));
        }

        info!(endpoint, request_id = %status.request_id, "Channel refreshed, calling again");
        self.bridge.invoke(endpoint, params).await.map_err(|err| {
            status.last_error = Some(err.message.clone());
            self.track(status);
            error!(endpoint, request_id = %status.request_id, error = %err, "Request failed after channel refresh");
            CoordinatorError::invocation(endpoint, err)
        })
    }

    fn track(&self, status: &RequestStatus) {
        if let Some(mut entry) = self.state.active.get_mut(&status.request_id) {
            *entry = status.clone();
        }
    }
}
