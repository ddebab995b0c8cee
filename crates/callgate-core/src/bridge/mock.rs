//! Mock bridge for testing and simulation
//!
//! Answers from per-endpoint queues of scripted responses and emulates the
//! host's channel refresh command and completion signal.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::Bridge;
use crate::error::BridgeError;

/// How the mock reacts to a channel refresh command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshBehavior {
    /// Accept the command and emit the refreshed signal after a delay
    SignalAfter(Duration),
    /// Accept the command and never signal
    Never,
    /// Reject the command with the given message
    Fail(String),
}

impl Default for RefreshBehavior {
    fn default() -> Self {
        Self::SignalAfter(Duration::ZERO)
    }
}

type Scripted = Result<Value, BridgeError>;

#[derive(Default)]
struct Script {
    queued: HashMap<String, VecDeque<Scripted>>,
    fallback: HashMap<String, Scripted>,
}

/// A bridge that returns queued responses, or `Value::Null` when nothing is queued.
#[derive(Clone)]
pub struct MockBridge {
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
    refresh_behavior: Arc<Mutex<RefreshBehavior>>,
    refresh_commands: Arc<AtomicUsize>,
    latency: Arc<Mutex<Duration>>,
    refreshed_tx: broadcast::Sender<()>,
}

impl Default for MockBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBridge")
            .field("total_calls", &self.total_calls())
            .field("refresh_commands", &self.refresh_count())
            .finish()
    }
}

impl MockBridge {
    /// Create a new mock bridge.
    #[must_use]
    pub fn new() -> Self {
        let (refreshed_tx, _) = broadcast::channel(16);
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            refresh_behavior: Arc::new(Mutex::new(RefreshBehavior::default())),
            refresh_commands: Arc::new(AtomicUsize::new(0)),
            latency: Arc::new(Mutex::new(Duration::ZERO)),
            refreshed_tx,
        }
    }

    /// Queue the next response for an endpoint.
    pub fn push_response(&self, endpoint: impl Into<String>, response: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .queued
            .entry(endpoint.into())
            .or_default()
            .push_back(response);
    }

    /// Queue `count` copies of the same failure for an endpoint.
    pub fn push_failures(&self, endpoint: impl Into<String>, error: BridgeError, count: usize) {
        let endpoint = endpoint.into();
        for _ in 0..count {
            self.push_response(endpoint.clone(), Err(error.clone()));
        }
    }

    /// Response used for an endpoint once its queue is empty.
    pub fn set_fallback(&self, endpoint: impl Into<String>, response: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fallback
            .insert(endpoint.into(), response);
    }

    /// Make every unscripted call to an endpoint fail.
    pub fn fail_always(&self, endpoint: impl Into<String>, error: BridgeError) {
        self.set_fallback(endpoint, Err(error));
    }

    /// Delay applied to every `invoke` before it answers.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Change how refresh commands behave.
    pub fn set_refresh_behavior(&self, behavior: RefreshBehavior) {
        *self.refresh_behavior.lock().unwrap_or_else(|e| e.into_inner()) = behavior;
    }

    /// Emit the channel refreshed signal now. Returns the number of listeners.
    pub fn signal_refreshed(&self) -> usize {
        self.refreshed_tx.send(()).unwrap_or(0)
    }

    /// Number of live refreshed-signal listeners.
    #[must_use]
    pub fn refreshed_listener_count(&self) -> usize {
        self.refreshed_tx.receiver_count()
    }

    /// Number of `invoke` calls made for an endpoint.
    #[must_use]
    pub fn calls(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    /// Number of `invoke` calls across all endpoints.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }

    /// Number of refresh commands issued.
    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.refresh_commands.load(Ordering::SeqCst)
    }

    fn next_response(&self, endpoint: &str) -> Scripted {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(response) = script.queued.get_mut(endpoint).and_then(VecDeque::pop_front) {
            return response;
        }
        script
            .fallback
            .get(endpoint)
            .cloned()
            .unwrap_or(Ok(Value::Null))
    }
}

#[async_trait]
impl Bridge for MockBridge {
    async fn invoke(&self, endpoint: &str, _params: &Value) -> Result<Value, BridgeError> {
        *self
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(endpoint.to_string())
            .or_default() += 1;

        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.next_response(endpoint)
    }

    async fn refresh_channel(&self) -> Result<(), BridgeError> {
        self.refresh_commands.fetch_add(1, Ordering::SeqCst);

        let behavior = self
            .refresh_behavior
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        match behavior {
            RefreshBehavior::SignalAfter(delay) => {
                let tx = self.refreshed_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(());
                });
                Ok(())
            }
            RefreshBehavior::Never => Ok(()),
            RefreshBehavior::Fail(message) => Err(BridgeError::network(message)),
        }
    }

    fn subscribe_refreshed(&self) -> broadcast::Receiver<()> {
        self.refreshed_tx.subscribe()
    }
}
