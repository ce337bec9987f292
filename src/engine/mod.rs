//! Client-side favorites engine.
//!
//! [`FavoritesEngine`] owns the server snapshot, the local overlay and the
//! per-key reconciliation tokens. It is a cheap clonable handle; every
//! clone sees the same state. Reads are synchronous, network work runs as
//! tokio tasks, and no lock is ever held across an `.await`.
//!
//! - `toggle`: optimistic toggle/set and remote write
//! - `reconcile`: per-key convergence loop with backoff and supersession
//! - `refresh`: snapshot refresh and its debounced scheduler

mod reconcile;
mod refresh;
mod toggle;

use std::collections::BTreeSet;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::cache::OverlayCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, KeyConfig, SyncConfig};
use crate::overlay::{OverlayEntries, OverlayEntry, OverlayStore};
use crate::projection;
use crate::remote::FavoritesRemote;
use crate::snapshot::{LoadStatus, SnapshotStore};

pub use reconcile::{ReconcileOutcome, ReconcileTicket, ReconcileTokens};

const EVENT_CAPACITY: usize = 64;

/// Notifications for views that render the effective favorite set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FavoritesEvent {
    /// The overlay changed; recompute the effective set.
    OverlayChanged,
    /// A refresh replaced the server snapshot.
    SnapshotRefreshed { count: usize },
    /// A refresh failed; the previous snapshot is still in use.
    SnapshotFailed { error: String },
    /// A remote write failed and the toggle was reverted.
    ToggleFailed { key: String, error: String },
    /// The server now agrees with the overlay entry, which was removed.
    Converged { key: String },
    /// The entry outlived the TTL without converging and was dropped.
    Expired { key: String },
}

struct EngineInner {
    remote: Arc<dyn FavoritesRemote>,
    overlay: OverlayStore,
    snapshot: SnapshotStore,
    tokens: ReconcileTokens,
    /// Bumped by every `schedule_refresh`; only the latest one fires.
    refresh_generation: AtomicU64,
    sync: SyncConfig,
    keys: KeyConfig,
    page_limit: Option<u32>,
    last_error: Mutex<Option<String>>,
    events: broadcast::Sender<FavoritesEvent>,
}

#[derive(Clone)]
pub struct FavoritesEngine {
    inner: Arc<EngineInner>,
}

impl FavoritesEngine {
    pub fn new(
        remote: Arc<dyn FavoritesRemote>,
        cache: Option<Box<dyn OverlayCache>>,
        config: &Config,
    ) -> Self {
        Self::with_clock(remote, cache, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        remote: Arc<dyn FavoritesRemote>,
        cache: Option<Box<dyn OverlayCache>>,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let expiry_events = events.clone();
        let overlay = OverlayStore::new(cache, clock, config.sync.overlay_ttl()).with_expiry_listener(Box::new(
            move |keys: &[String]| {
                for key in keys {
                    tracing::info!(key = %key, "Favorite change expired before converging");
                    let _ = expiry_events.send(FavoritesEvent::Expired { key: key.clone() });
                }
                let _ = expiry_events.send(FavoritesEvent::OverlayChanged);
            },
        ));

        Self {
            inner: Arc::new(EngineInner {
                remote,
                overlay,
                snapshot: SnapshotStore::new(),
                tokens: ReconcileTokens::default(),
                refresh_generation: AtomicU64::new(0),
                sync: config.sync.clone(),
                keys: config.keys.clone(),
                page_limit: config.remote.page_limit,
                last_error: Mutex::new(None),
                events,
            }),
        }
    }

    /// Initial load: fetch the snapshot and resume reconciliation for
    /// entries restored from the overlay cache.
    pub async fn start(&self) {
        let restored = self.inner.overlay.read();
        if !restored.is_empty() {
            tracing::info!(count = restored.len(), "Restored pending favorite changes");
        }

        // A failure is recorded in the load status; reconciliation retries
        let _ = self.refresh().await;

        for (key, entry) in restored.iter() {
            self.spawn_reconcile(key.clone(), entry.desired);
        }
    }

    /// The set the UI should render: snapshot merged with the overlay.
    pub fn effective_favorites(&self) -> BTreeSet<String> {
        projection::effective_favorites(&self.inner.snapshot.keys(), &self.inner.overlay.read())
    }

    pub fn is_favorite(&self, key: &str) -> bool {
        projection::is_effective_favorite(&self.inner.snapshot.keys(), &self.inner.overlay.read(), key)
    }

    /// True while a change to `key` is waiting to converge.
    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.overlay.get(key).is_some()
    }

    pub fn overlay_entry(&self, key: &str) -> Option<OverlayEntry> {
        self.inner.overlay.get(key)
    }

    pub fn overlay_entries(&self) -> Arc<OverlayEntries> {
        self.inner.overlay.read()
    }

    /// Last successfully loaded server snapshot, None before the first load.
    pub fn server_snapshot(&self) -> Option<Arc<BTreeSet<String>>> {
        self.inner.snapshot.loaded_keys()
    }

    /// When the current snapshot was fetched.
    pub fn snapshot_fetched_at(&self) -> Option<DateTime<Utc>> {
        self.inner.snapshot.fetched_at()
    }

    pub fn load_status(&self) -> LoadStatus {
        self.inner.snapshot.status()
    }

    /// Error of the last failed snapshot refresh, if the latest one failed.
    pub fn load_error(&self) -> Option<String> {
        self.inner.snapshot.error()
    }

    /// Error of the last failed toggle, cleared by the next toggle.
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn overlay_is_durable(&self) -> bool {
        self.inner.overlay.is_durable()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FavoritesEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: FavoritesEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }

    fn set_last_error(&self, error: Option<String>) {
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }
}
