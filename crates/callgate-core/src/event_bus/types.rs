use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RequestStatus;

/// Kind of a [`NetworkEvent`]; subscriptions are made per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkEventKind {
    /// A call chain is about to retry
    #[serde(rename = "request-retry")]
    RequestRetry,
    /// A call chain exhausted its retries
    #[serde(rename = "request-failed")]
    RequestFailed,
    /// A channel refresh session started
    #[serde(rename = "inbound-refreshing")]
    InboundRefreshing,
    /// The host reported the channel as refreshed
    #[serde(rename = "inbound-refreshed")]
    InboundRefreshed,
}

impl NetworkEventKind {
    /// Wire name of the event kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestRetry => "request-retry",
            Self::RequestFailed => "request-failed",
            Self::InboundRefreshing => "inbound-refreshing",
            Self::InboundRefreshed => "inbound-refreshed",
        }
    }
}

impl std::fmt::Display for NetworkEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status events published by the coordinator and the refresh gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkEvent {
    /// A call chain is retrying
    RequestRetry {
        /// Chain status after the retry counter was bumped
        status: RequestStatus,
        /// Delay before the retry attempt
        delay_ms: u64,
    },
    /// A call chain ran out of retries
    RequestFailed {
        /// Final chain status
        status: RequestStatus,
    },
    /// A channel refresh session started
    InboundRefreshing {
        /// When the session started
        timestamp: DateTime<Utc>,
    },
    /// The channel refreshed signal arrived
    InboundRefreshed {
        /// Always true; failures are not announced on the bus
        success: bool,
        /// When the signal was observed
        timestamp: DateTime<Utc>,
    },
}

impl NetworkEvent {
    /// Kind of this event.
    #[must_use]
    pub fn kind(&self) -> NetworkEventKind {
        match self {
            Self::RequestRetry { .. } => NetworkEventKind::RequestRetry,
            Self::RequestFailed { .. } => NetworkEventKind::RequestFailed,
            Self::InboundRefreshing { .. } => NetworkEventKind::InboundRefreshing,
            Self::InboundRefreshed { .. } => NetworkEventKind::InboundRefreshed,
        }
    }

    /// Status carried by request events.
    #[must_use]
    pub fn status(&self) -> Option<&RequestStatus> {
        match self {
            Self::RequestRetry { status, .. } | Self::RequestFailed { status } => Some(status),
            Self::InboundRefreshing { .. } | Self::InboundRefreshed { .. } => None,
        }
    }

    pub(crate) fn inbound_refreshing() -> Self {
        Self::InboundRefreshing {
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn inbound_refreshed() -> Self {
        Self::InboundRefreshed {
            success: true,
            timestamp: Utc::now(),
        }
    }
}
