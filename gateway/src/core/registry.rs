//! Active call registry.
//!
//! One map guarded by one mutex, keyed by call id. Registering a call id that
//! is already present replaces the entry and then signals the displaced call to
//! shut down. The signal is sent after the lock is released, so a call task that
//! ends up closing itself can never deadlock on the registry.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::call::Direction;

/// Proof of registration held by the call task.
#[derive(Debug, Clone)]
pub struct Registration {
    pub call_id: String,
    pub token: Uuid,
    /// Cancelled when another session takes over this call id
    pub superseded: CancellationToken,
}

#[derive(Debug)]
struct CallEntry {
    token: Uuid,
    superseded: CancellationToken,
    business_id: String,
    direction: Direction,
    started_at: Instant,
}

/// Snapshot of a registered call.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActiveCall {
    pub call_id: String,
    pub business_id: String,
    pub direction: Direction,
    pub duration_secs: u64,
}

#[derive(Debug, Default)]
pub struct CallRegistry {
    calls: Mutex<HashMap<String, CallEntry>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call session, displacing any session already holding `call_id`.
    pub fn register(&self, call_id: &str, business_id: &str, direction: Direction) -> Registration {
        let registration = Registration {
            call_id: call_id.to_string(),
            token: Uuid::new_v4(),
            superseded: CancellationToken::new(),
        };
        let entry = CallEntry {
            token: registration.token,
            superseded: registration.superseded.clone(),
            business_id: business_id.to_string(),
            direction,
            started_at: Instant::now(),
        };

        let previous = self.calls.lock().insert(call_id.to_string(), entry);

        if let Some(previous) = previous {
            warn!(
                call_id,
                previous_token = %previous.token,
                "SHADOW_SESSION: call id already registered, closing previous session"
            );
            previous.superseded.cancel();
        } else {
            info!(call_id, token = %registration.token, "Call registered");
        }

        registration
    }

    /// Remove `call_id` only if it is still owned by `token`.
    pub fn unregister(&self, call_id: &str, token: Uuid) -> bool {
        let removed = {
            let mut calls = self.calls.lock();
            match calls.get(call_id) {
                Some(entry) if entry.token == token => calls.remove(call_id).is_some(),
                _ => false,
            }
        };

        if removed {
            info!(call_id, "Call unregistered");
        } else {
            debug!(call_id, token = %token, "Unregister skipped, entry owned by another session");
        }
        removed
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.calls.lock().contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    pub fn active_calls(&self) -> Vec<ActiveCall> {
        let now = Instant::now();
        let mut calls: Vec<ActiveCall> = self
            .calls
            .lock()
            .iter()
            .map(|(call_id, entry)| ActiveCall {
                call_id: call_id.clone(),
                business_id: entry.business_id.clone(),
                direction: entry.direction,
                duration_secs: now.saturating_duration_since(entry.started_at).as_secs(),
            })
            .collect();
        calls.sort_by(|a, b| a.call_id.cmp(&b.call_id));
        calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_replaces_and_closes_previous() {
        let registry = CallRegistry::new();
        let first = registry.register("CA1", "biz", Direction::Inbound);
        let second = registry.register("CA1", "biz", Direction::Inbound);

        assert!(first.superseded.is_cancelled());
        assert!(!second.superseded.is_cancelled());
        assert_eq!(registry.len(), 1);

        // the displaced session cannot remove the new entry
        assert!(!registry.unregister("CA1", first.token));
        assert!(registry.contains("CA1"));

        assert!(registry.unregister("CA1", second.token));
        assert!(registry.is_empty());
        assert!(!registry.unregister("CA1", second.token));
    }

    #[test]
    fn test_active_calls_listing() {
        let registry = CallRegistry::new();
        registry.register("CB", "biz-2", Direction::Outbound);
        registry.register("CA", "biz-1", Direction::Inbound);

        let calls = registry.active_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].call_id, "CA");
        assert_eq!(calls[1].direction, Direction::Outbound);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_leaves_one_entry() {
        let registry = Arc::new(CallRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.register("CA1", "biz", Direction::Inbound)
            }));
        }

        let mut registrations = Vec::new();
        for handle in handles {
            registrations.push(handle.await.unwrap());
        }

        assert_eq!(registry.len(), 1);
        let live: Vec<_> = registrations
            .iter()
            .filter(|r| !r.superseded.is_cancelled())
            .collect();
        assert_eq!(live.len(), 1);
    }
}
