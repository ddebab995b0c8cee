use std::sync::{Arc, Mutex};

use serde::Serialize;

/// Recovery phase a chain is in while it owns the coordination token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPhase {
    /// Automatic retries
    Retry,
    /// Channel refresh and the one direct attempt after it
    Refresh,
}

impl std::fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retry => write!(f, "retry"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

/// Current owner of the right to perform automatic recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryOwner {
    /// Endpoint whose chain is recovering
    pub endpoint: String,
    /// Phase it is in
    pub phase: RecoveryPhase,
}

impl std::fmt::Display for RecoveryOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.endpoint, self.phase)
    }
}

/// Process-wide flag allowing one recovering endpoint at a time.
///
/// Ownership is keyed by endpoint: a chain may enter recovery while the token
/// is free or already held for its own endpoint. Every chain holding it is
/// counted and the token is freed when the last one settles.
#[derive(Debug, Default)]
pub(crate) struct CoordinationToken {
    holder: Mutex<Option<Holder>>,
}

#[derive(Debug)]
struct Holder {
    owner: RecoveryOwner,
    chains: usize,
}

impl CoordinationToken {
    pub(crate) fn holder(&self) -> Option<RecoveryOwner> {
        self.holder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|h| h.owner.clone())
    }

    /// Owner blocking `endpoint` from recovering, if any.
    pub(crate) fn conflicting_owner(&self, endpoint: &str) -> Option<RecoveryOwner> {
        self.holder().filter(|owner| owner.endpoint != endpoint)
    }

    /// Take or update the token for `endpoint`, or report who holds it.
    fn acquire(
        &self,
        endpoint: &str,
        phase: RecoveryPhase,
        new_chain: bool,
    ) -> Result<(), RecoveryOwner> {
        let mut holder = self.holder.lock().unwrap_or_else(|e| e.into_inner());
        match holder.as_mut() {
            Some(h) if h.owner.endpoint != endpoint => Err(h.owner.clone()),
            Some(h) => {
                h.owner.phase = phase;
                if new_chain {
                    h.chains += 1;
                }
                Ok(())
            }
            None => {
                *holder = Some(Holder {
                    owner: RecoveryOwner {
                        endpoint: endpoint.to_string(),
                        phase,
                    },
                    chains: 1,
                });
                Ok(())
            }
        }
    }

    fn release(&self, endpoint: &str) {
        let mut holder = self.holder.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(h) = holder.as_mut().filter(|h| h.owner.endpoint == endpoint) {
            h.chains = h.chains.saturating_sub(1);
            if h.chains == 0 {
                *holder = None;
            }
        }
    }
}

/// Token ownership held by one chain; released on drop.
#[derive(Debug)]
pub(crate) struct TokenGuard {
    token: Arc<CoordinationToken>,
    endpoint: String,
}

impl Drop for TokenGuard {
    fn drop(&mut self) {
        self.token.release(&self.endpoint);
    }
}

/// Enter `phase` for the chain owning `guard`, acquiring the token on first use.
///
/// The guard is kept in the chain until it settles, so the token covers every
/// retry and the refresh that follows them.
pub(crate) fn enter_recovery(
    token: &Arc<CoordinationToken>,
    guard: &mut Option<TokenGuard>,
    endpoint: &str,
    phase: RecoveryPhase,
) -> Result<(), RecoveryOwner> {
    token.acquire(endpoint, phase, guard.is_none())?;
    if guard.is_none() {
        *guard = Some(TokenGuard {
            token: Arc::clone(token),
            endpoint: endpoint.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_chain_takes_token() {
        let token = Arc::new(CoordinationToken::default());
        let mut guard = None;

        enter_recovery(&token, &mut guard, "get_account", RecoveryPhase::Retry).unwrap();

        assert_eq!(
            token.holder(),
            Some(RecoveryOwner {
                endpoint: "get_account".to_string(),
                phase: RecoveryPhase::Retry,
            })
        );
        assert!(token.conflicting_owner("get_account").is_none());
        assert!(token.conflicting_owner("get_usage").is_some());
    }

    #[test]
    fn test_other_endpoint_is_refused() {
        let token = Arc::new(CoordinationToken::default());
        let mut first = None;
        let mut second = None;

        enter_recovery(&token, &mut first, "get_account", RecoveryPhase::Retry).unwrap();
        let owner = enter_recovery(&token, &mut second, "get_usage", RecoveryPhase::Retry)
            .unwrap_err();

        assert_eq!(owner.to_string(), "get_account_retry");
        assert!(second.is_none());
    }

    #[test]
    fn test_phase_switch_keeps_ownership() {
        let token = Arc::new(CoordinationToken::default());
        let mut guard = None;

        enter_recovery(&token, &mut guard, "get_account", RecoveryPhase::Retry).unwrap();
        enter_recovery(&token, &mut guard, "get_account", RecoveryPhase::Refresh).unwrap();

        assert_eq!(token.holder().unwrap().phase, RecoveryPhase::Refresh);
    }

    #[test]
    fn test_drop_releases_token() {
        let token = Arc::new(CoordinationToken::default());
        let mut guard = None;
        enter_recovery(&token, &mut guard, "get_account", RecoveryPhase::Retry).unwrap();

        drop(guard);

        assert!(token.holder().is_none());
        let mut next = None;
        assert!(enter_recovery(&token, &mut next, "get_usage", RecoveryPhase::Retry).is_ok());
    }

    #[test]
    fn test_token_held_until_last_chain_of_endpoint() {
        let token = Arc::new(CoordinationToken::default());
        let mut first = None;
        let mut second = None;
        enter_recovery(&token, &mut first, "get_balance", RecoveryPhase::Refresh).unwrap();
        enter_recovery(&token, &mut second, "get_balance", RecoveryPhase::Retry).unwrap();

        drop(second);
        assert_eq!(token.holder().unwrap().endpoint, "get_balance");
        assert!(token.conflicting_owner("get_usage").is_some());

        drop(first);
        assert!(token.holder().is_none());
    }
}
