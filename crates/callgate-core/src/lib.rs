//! Callgate Core - Resilient Remote Invocation
//!
//! This crate wraps an unreliable remote call primitive (the [`Bridge`]) and
//! makes every call through it resilient, including:
//! - Single-flight: concurrent identical calls share one execution
//! - Retry: bounded automatic retries with optional backoff
//! - Recovery: one coordinated channel refresh after retries run out
//! - Events: de-duplicated status feed for UI observers
//! - Lifecycle: lazy coordinator creation and idempotent teardown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event_bus;
pub mod lifecycle;
pub mod refresh_gate;
pub mod types;

pub use bridge::{Bridge, MockBridge, RefreshBehavior};
pub use config::{CoordinatorConfig, EventBusConfig, InvocationConfig, RefreshConfig, RequestOptions};
pub use coordinator::{RecoveryOwner, RecoveryPhase, RequestCoordinator};
pub use error::{BridgeError, BridgeErrorKind, CoordinatorError, RefreshError, Result};
pub use event_bus::{EventBus, NetworkEvent, NetworkEventKind, Subscription};
pub use lifecycle::CoordinatorRuntime;
pub use refresh_gate::ChannelRefreshGate;
pub use types::{RequestKey, RequestStatus};
