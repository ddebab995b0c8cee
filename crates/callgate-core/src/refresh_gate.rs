//! ChannelRefreshGate - single-flight channel refresh
//!
//! At most one refresh session is live at a time. The first caller starts
//! it; everyone arriving while it runs awaits the same outcome. A session
//! settles on whichever comes first:
//! - the bridge's "channel refreshed" signal (success)
//! - the timeout clock (`RefreshError::Timeout`)
//! - the refresh command being rejected (`RefreshError::Failed`)
//!
//! The session runs on its own task and clears the slot when it settles, so
//! the next caller always starts a fresh session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

use crate::bridge::Bridge;
use crate::config::RefreshConfig;
use crate::error::RefreshError;
use crate::event_bus::{EventBus, NetworkEvent};

type SessionOutcome = Shared<BoxFuture<'static, Result<bool, RefreshError>>>;

struct Session {
    id: u64,
    outcome: SessionOutcome,
}

type SessionSlot = Arc<Mutex<Option<Session>>>;

/// Clears the session slot when the session task ends, panics included.
struct SlotGuard {
    slot: SessionSlot,
    id: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|s| s.id == self.id) {
            *slot = None;
        }
    }
}

/// Single-flight coordinator for channel refresh sessions
pub struct ChannelRefreshGate {
    bridge: Arc<dyn Bridge>,
    bus: EventBus,
    timeout: Duration,
    session: SessionSlot,
    next_session: AtomicU64,
}

impl std::fmt::Debug for ChannelRefreshGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRefreshGate")
            .field("timeout", &self.timeout)
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

impl ChannelRefreshGate {
    /// Create a new gate
    #[must_use]
    pub fn new(bridge: Arc<dyn Bridge>, bus: EventBus, config: &RefreshConfig) -> Self {
        Self {
            bridge,
            bus,
            timeout: config.timeout(),
            session: Arc::new(Mutex::new(None)),
            next_session: AtomicU64::new(1),
        }
    }

    /// How long a session waits for the refreshed signal
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a refresh session is live
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Refresh the channel, or join the refresh already in progress.
    pub async fn refresh(&self) -> Result<bool, RefreshError> {
        let outcome = {
            let mut slot = self.session.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(session) => {
                    info!(session = session.id, "Channel refresh in progress, waiting for it");
                    session.outcome.clone()
                }
                None => {
                    let id = self.next_session.fetch_add(1, Ordering::Relaxed);
                    // Spawned while the slot is locked, so the session can only
                    // clear the slot after it has been stored.
                    let outcome = self.start_session(id);
                    *slot = Some(Session {
                        id,
                        outcome: outcome.clone(),
                    });
                    outcome
                }
            }
        };

        outcome.await
    }

    fn start_session(&self, id: u64) -> SessionOutcome {
        let bridge = Arc::clone(&self.bridge);
        let bus = self.bus.clone();
        let timeout = self.timeout;
        let slot = Arc::clone(&self.session);

        let handle = tokio::spawn(async move {
            let _guard = SlotGuard { slot, id };
            run_session(bridge.as_ref(), &bus, timeout, id).await
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                error!(session = id, error = %e, "Channel refresh session task ended abnormally");
                Err(RefreshError::Aborted)
            })
        }
        .boxed()
        .shared()
    }
}

async fn run_session(
    bridge: &dyn Bridge,
    bus: &EventBus,
    timeout: Duration,
    id: u64,
) -> Result<bool, RefreshError> {
    info!(session = id, timeout_ms = timeout.as_millis() as u64, "Starting channel refresh");
    bus.publish(NetworkEvent::inbound_refreshing(), Some("inbound_refreshing"));

    // Listen before issuing the command so a fast signal is not missed
    let mut refreshed = bridge.subscribe_refreshed();
    let command = bridge.refresh_channel();
    let deadline = tokio::time::sleep(timeout);

    tokio::select! {
        () = wait_for_signal(&mut refreshed) => {
            info!(session = id, "Channel refreshed");
            bus.publish(NetworkEvent::inbound_refreshed(), Some("inbound_refreshed"));
            Ok(true)
        }
        () = deadline => {
            error!(session = id, timeout_ms = timeout.as_millis() as u64, "Channel refresh timed out");
            Err(RefreshError::Timeout(timeout))
        }
        Err(e) = command => {
            error!(session = id, error = %e, "Channel refresh command failed");
            Err(RefreshError::Failed(e.message))
        }
    }
}

async fn wait_for_signal(rx: &mut broadcast::Receiver<()>) {
    match rx.recv().await {
        Ok(()) | Err(RecvError::Lagged(_)) => {}
        Err(RecvError::Closed) => {
            warn!("Channel refreshed signal source closed");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests;
