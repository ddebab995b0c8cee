//! Shared data model: request identity and per-chain status.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity of "the same logical call", used for in-flight deduplication only.
///
/// Built from the endpoint and the JSON form of the parameters, with object
/// keys sorted so equal parameter sets always produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    /// Derive the key for a call.
    #[must_use]
    pub fn new(endpoint: &str, params: &Value) -> Self {
        let params = match params {
            Value::Null => "{}".to_string(),
            other => canonical(other).to_string(),
        };
        Self(format!("{endpoint}_{params}"))
    }

    /// Key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Progress record of one call chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStatus {
    /// Unique chain identifier
    pub request_id: Uuid,
    /// Endpoint being called
    pub endpoint: String,
    /// Whether the chain is currently in its retry phase
    pub is_retrying: bool,
    /// Automatic retries performed so far
    pub retry_count: u32,
    /// Retry budget of this chain
    pub max_retries: u32,
    /// Message of the most recent failure
    pub last_error: Option<String>,
}

impl RequestStatus {
    /// Fresh status for a chain that has not made any attempt yet.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, max_retries: u32) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            endpoint: endpoint.into(),
            is_retrying: false,
            retry_count: 0,
            max_retries,
            last_error: None,
        }
    }

    /// Whether another automatic retry is allowed.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
