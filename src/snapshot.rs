//! Last observed server favorite set and its load status.
//!
//! The snapshot is only ever replaced wholesale. A failed refresh keeps the
//! previous snapshot so the effective set doesn't flicker; before the first
//! successful load there is no snapshot at all, only the error.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

/// `Idle → Loading → {Loaded, Error}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Loaded,
    Error,
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStatus::Idle => write!(f, "idle"),
            LoadStatus::Loading => write!(f, "loading"),
            LoadStatus::Loaded => write!(f, "loaded"),
            LoadStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Default)]
struct SnapshotState {
    keys: Option<Arc<BTreeSet<String>>>,
    status: LoadStatus,
    error: Option<String>,
    fetched_at: Option<DateTime<Utc>>,
    /// Last request number handed out by `begin`
    issued: u64,
    /// Newest request whose result has been applied
    settled: u64,
}

#[derive(Debug, Default)]
pub struct SnapshotStore {
    state: Mutex<SnapshotState>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a refresh as started. Returns its request number.
    pub fn begin(&self) -> u64 {
        let mut state = self.lock();
        state.issued += 1;
        state.status = LoadStatus::Loading;
        state.error = None;
        state.issued
    }

    /// Replace the snapshot with a fetched set.
    ///
    /// Returns false (and changes nothing) if a newer request already
    /// settled.
    pub fn complete(&self, request: u64, keys: BTreeSet<String>) -> bool {
        let mut state = self.lock();
        if request <= state.settled {
            return false;
        }
        state.settled = request;
        state.keys = Some(Arc::new(keys));
        state.fetched_at = Some(Utc::now());
        state.error = None;
        state.status = Self::settled_status(&state, LoadStatus::Loaded);
        true
    }

    /// Record a failed refresh, keeping the last good snapshot.
    pub fn fail(&self, request: u64, error: String) -> bool {
        let mut state = self.lock();
        if request <= state.settled {
            return false;
        }
        state.settled = request;
        state.error = Some(error);
        state.status = Self::settled_status(&state, LoadStatus::Error);
        true
    }

    /// Snapshot keys, empty before the first successful load.
    pub fn keys(&self) -> Arc<BTreeSet<String>> {
        self.lock().keys.clone().unwrap_or_default()
    }

    /// Snapshot keys, None before the first successful load.
    pub fn loaded_keys(&self) -> Option<Arc<BTreeSet<String>>> {
        self.lock().keys.clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().keys.as_ref().is_some_and(|keys| keys.contains(key))
    }

    pub fn status(&self) -> LoadStatus {
        self.lock().status
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.lock().fetched_at
    }

    // A later request still in flight keeps the store in Loading.
    fn settled_status(state: &SnapshotState, outcome: LoadStatus) -> LoadStatus {
        if state.issued > state.settled {
            LoadStatus::Loading
        } else {
            outcome
        }
    }

    fn lock(&self) -> MutexGuard<'_, SnapshotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_starts_idle_without_snapshot() {
        let store = SnapshotStore::new();
        assert_eq!(store.status(), LoadStatus::Idle);
        assert!(store.loaded_keys().is_none());
        assert!(store.keys().is_empty());
        assert!(!store.contains("a.mp4"));
    }

    #[test]
    fn test_load_cycle() {
        let store = SnapshotStore::new();
        let request = store.begin();
        assert_eq!(store.status(), LoadStatus::Loading);

        assert!(store.complete(request, set(&["a.mp4"])));
        assert_eq!(store.status(), LoadStatus::Loaded);
        assert!(store.contains("a.mp4"));
        assert!(store.fetched_at().is_some());
    }

    #[test]
    fn test_error_retains_last_snapshot() {
        let store = SnapshotStore::new();
        let first = store.begin();
        store.complete(first, set(&["a.mp4"]));

        let second = store.begin();
        assert!(store.fail(second, "HTTP 500".to_string()));

        assert_eq!(store.status(), LoadStatus::Error);
        assert_eq!(store.error().as_deref(), Some("HTTP 500"));
        assert_eq!(*store.keys(), set(&["a.mp4"]));
    }

    #[test]
    fn test_first_failure_has_no_data() {
        let store = SnapshotStore::new();
        let request = store.begin();
        store.fail(request, "offline".to_string());

        assert_eq!(store.status(), LoadStatus::Error);
        assert!(store.loaded_keys().is_none());
    }

    #[test]
    fn test_stale_completion_is_discarded() {
        let store = SnapshotStore::new();
        let older = store.begin();
        let newer = store.begin();

        assert!(store.complete(newer, set(&["new.mp4"])));
        assert!(!store.complete(older, set(&["old.mp4"])));
        assert!(!store.fail(older, "late".to_string()));

        assert_eq!(*store.keys(), set(&["new.mp4"]));
        assert_eq!(store.status(), LoadStatus::Loaded);
    }

    #[test]
    fn test_stays_loading_while_newer_request_in_flight() {
        let store = SnapshotStore::new();
        let older = store.begin();
        let _newer = store.begin();

        store.complete(older, set(&["a.mp4"]));
        assert_eq!(store.status(), LoadStatus::Loading);
        assert!(store.contains("a.mp4"));
    }

    #[test]
    fn test_begin_clears_error() {
        let store = SnapshotStore::new();
        let request = store.begin();
        store.fail(request, "boom".to_string());
        store.begin();
        assert!(store.error().is_none());
    }
}
