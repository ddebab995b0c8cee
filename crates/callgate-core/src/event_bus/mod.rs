//! EventBus - de-duplicated status feed for observers.
//!
//! The coordinator and the refresh gate publish retry, failure and channel
//! refresh events here. UI layers subscribe per event kind with callbacks or
//! consume the async stream.

/// Core event bus implementation (callbacks + broadcast stream).
pub mod bus;
/// Event type definitions.
pub mod types;

pub use bus::{EventBus, Subscription};
pub use types::{NetworkEvent, NetworkEventKind};

#[cfg(test)]
mod tests;
