//! Error types for callgate-core
//!
//! Three layers of failure exist:
//! - [`BridgeError`]: a single bridge call failed (the InvocationFailure cause)
//! - [`RefreshError`]: a channel refresh session did not complete
//! - [`CoordinatorError`]: what a caller of `request()` observes
//!
//! All three are `Clone` so one outcome can be handed to every waiter of a
//! shared in-flight call or refresh session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured failure category assigned by the bridge at the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeErrorKind {
    /// Transport or connection failure
    Network,
    /// The host did not answer in time
    Timeout,
    /// Request or response signature rejected
    Signature,
    /// Response could not be parsed by the host
    Parse,
    /// Host refused the operation
    Permission,
    /// Local or remote data is corrupted
    Corruption,
    /// Anything the bridge could not categorise
    Other,
}

impl std::fmt::Display for BridgeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
            Self::Signature => write!(f, "signature"),
            Self::Parse => write!(f, "parse"),
            Self::Permission => write!(f, "permission"),
            Self::Corruption => write!(f, "corruption"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Failure reported by one bridge call.
///
/// The coordinator never looks at `message`; it only carries it back to the
/// caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct BridgeError {
    /// Failure category
    pub kind: BridgeErrorKind,
    /// Original host message
    pub message: String,
}

impl BridgeError {
    /// Construct a bridge error of the given kind.
    pub fn new(kind: BridgeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a [`BridgeErrorKind::Network`] failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Network, message)
    }

    /// Shorthand for a [`BridgeErrorKind::Timeout`] failure.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Timeout, message)
    }

    /// Shorthand for a [`BridgeErrorKind::Other`] failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Other, message)
    }

    /// Whether the failure is likely to go away on its own.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, BridgeErrorKind::Network | BridgeErrorKind::Timeout)
    }
}

/// Failure of a channel refresh session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// The channel refreshed signal did not arrive in time
    #[error("channel refresh timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The refresh command itself was rejected
    #[error("channel refresh failed: {0}")]
    Failed(String),

    /// The session task ended without an outcome
    #[error("channel refresh session aborted")]
    Aborted,
}

/// Error returned to callers of the request coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// The bridge call failed. Retry exhaustion, cascade suppression and a
    /// failed recovery all surface as this variant carrying the original cause.
    #[error("request '{endpoint}' failed: {source}")]
    Invocation {
        /// Endpoint that was called
        endpoint: String,
        /// Bridge failure that started the chain's final outcome
        #[source]
        source: BridgeError,
    },

    /// The shared result did not match the type this caller asked for
    #[error("request '{endpoint}' returned an unexpected payload: {message}")]
    Decode {
        /// Endpoint that was called
        endpoint: String,
        /// Deserialization message
        message: String,
    },

    /// The task driving the call ended without an outcome
    #[error("request '{endpoint}' was aborted")]
    Aborted {
        /// Endpoint that was called
        endpoint: String,
    },
}

impl CoordinatorError {
    pub(crate) fn invocation(endpoint: impl Into<String>, source: BridgeError) -> Self {
        Self::Invocation {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Endpoint the failed request targeted.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Invocation { endpoint, .. }
            | Self::Decode { endpoint, .. }
            | Self::Aborted { endpoint } => endpoint,
        }
    }

    /// The underlying bridge failure, if the request reached the bridge.
    #[must_use]
    pub fn bridge_error(&self) -> Option<&BridgeError> {
        match self {
            Self::Invocation { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Category of the underlying bridge failure.
    #[must_use]
    pub fn kind(&self) -> Option<BridgeErrorKind> {
        self.bridge_error().map(|e| e.kind)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CoordinatorError>;
