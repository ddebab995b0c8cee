//! Bridge - the host-provided remote call primitive
//!
//! The coordinator treats the bridge as an external collaborator: it performs
//! one remote call per `invoke`, triggers a channel refresh on request, and
//! announces when the channel has actually been refreshed.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::BridgeError;

mod mock;

pub use mock::{MockBridge, RefreshBehavior};

/// Remote invocation primitive over an unreliable transport.
#[async_trait]
pub trait Bridge: Send + Sync + 'static {
    /// Perform one remote call.
    async fn invoke(&self, endpoint: &str, params: &Value) -> Result<Value, BridgeError>;

    /// Ask the host to refresh the communication channel.
    ///
    /// Returning `Ok` only means the command was accepted; completion is
    /// announced later through [`Bridge::subscribe_refreshed`]. An `Err` means
    /// the command itself was rejected.
    async fn refresh_channel(&self) -> Result<(), BridgeError>;

    /// Register a listener for the "channel refreshed" signal.
    ///
    /// Every call returns an independent receiver; dropping it unregisters
    /// the listener.
    fn subscribe_refreshed(&self) -> broadcast::Receiver<()>;
}
