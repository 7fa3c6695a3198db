//! Observable engine state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::warn;

use crate::conflict::ConflictDetails;

/// Engine status. `Conflict` persists until a resolution runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
    Conflict,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
            SyncStatus::Conflict => "conflict",
        };
        f.write_str(name)
    }
}

/// Snapshot of the engine state delivered to observers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub is_online: bool,
    pub conflict_details: Option<ConflictDetails>,
}

/// Handle returned by [`StateHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&SyncState) + Send + Sync>;

struct Inner {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener)>,
}

/// Holds the current [`SyncState`] and fans transitions out to listeners.
///
/// Listeners are invoked outside the internal lock, in subscription order.
pub struct StateHub {
    state: watch::Sender<SyncState>,
    inner: Mutex<Inner>,
}

impl StateHub {
    pub fn new(initial: SyncState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state,
            inner: Mutex::new(Inner {
                next_id: 0,
                listeners: Vec::new(),
            }),
        }
    }

    pub fn current(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Register a listener. It is called immediately with the current state.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let id = match self.inner.lock() {
            Ok(mut inner) => {
                inner.next_id += 1;
                let id = SubscriptionId(inner.next_id);
                inner.listeners.push((id, Arc::clone(&listener)));
                id
            }
            Err(_) => {
                warn!("State listener registry is poisoned");
                SubscriptionId(0)
            }
        };

        listener(&self.current());
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.inner.lock() {
            Ok(mut inner) => {
                let before = inner.listeners.len();
                inner.listeners.retain(|(existing, _)| *existing != id);
                inner.listeners.len() != before
            }
            Err(_) => false,
        }
    }

    /// Async view of the state for callers that prefer a channel.
    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Apply `f` to the state and notify every listener.
    pub fn update<F>(&self, f: F) -> SyncState
    where
        F: FnOnce(&mut SyncState),
    {
        self.state.send_modify(f);
        let snapshot = self.current();

        let listeners: Vec<Listener> = match self.inner.lock() {
            Ok(inner) => inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => Vec::new(),
        };
        for listener in listeners {
            listener(&snapshot);
        }
        snapshot
    }
}

impl Default for StateHub {
    fn default() -> Self {
        Self::new(SyncState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_delivers_current_state() {
        let hub = StateHub::new(SyncState {
            is_online: true,
            ..SyncState::default()
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        hub.subscribe(move |state| sink.lock().unwrap().push(state.clone()));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_online);
        assert_eq!(seen[0].status, SyncStatus::Idle);
    }

    #[test]
    fn test_update_notifies_until_unsubscribed() {
        let hub = StateHub::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let id = hub.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        hub.update(|s| s.status = SyncStatus::Syncing);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        hub.update(|s| s.status = SyncStatus::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_watch_sees_updates() {
        let hub = StateHub::default();
        let mut rx = hub.watch();

        hub.update(|s| s.last_error = Some("boom".to_string()));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_state_json_shape() {
        let json = serde_json::to_value(SyncState::default()).unwrap();
        assert_eq!(json["status"], "idle");
        assert!(json.get("lastSyncTime").is_some());
        assert!(json.get("conflictDetails").is_some());
    }
}
