//! Snapshot refresh and the debounced refresh scheduler.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::{FavoritesEngine, FavoritesEvent};
use crate::error::{SyncError, SyncResult};
use crate::remote::fetch_snapshot;

impl FavoritesEngine {
    /// Fetch a fresh snapshot from the remote.
    ///
    /// On failure the previous snapshot stays in place and the load status
    /// becomes `Error`. A result that arrives after a newer refresh already
    /// settled is discarded.
    pub async fn refresh(&self) -> SyncResult<Arc<BTreeSet<String>>> {
        let request = self.inner.snapshot.begin();
        let backend = self.inner.remote.backend_name();

        match fetch_snapshot(&*self.inner.remote, self.inner.page_limit).await {
            Ok(keys) => {
                let count = keys.len();
                if self.inner.snapshot.complete(request, keys) {
                    tracing::debug!(backend, count, "Favorites snapshot refreshed");
                    self.emit(FavoritesEvent::SnapshotRefreshed { count });
                } else {
                    tracing::debug!(backend, request, "Discarded stale favorites snapshot");
                }
                Ok(self.inner.snapshot.keys())
            }
            Err(e) => {
                let message = format!("{e:#}");
                if self.inner.snapshot.fail(request, message.clone()) {
                    tracing::warn!(backend, "Failed to refresh favorites: {message}");
                    self.emit(FavoritesEvent::SnapshotFailed { error: message });
                }
                Err(SyncError::Fetch(e))
            }
        }
    }

    /// Refresh once calls stop arriving for the debounce window.
    ///
    /// Every call restarts the window; a burst of toggles causes a single
    /// fetch after the last one.
    pub fn schedule_refresh(&self) {
        let generation = self.inner.refresh_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.inner.sync.refresh_debounce();
        let engine = self.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if engine.inner.refresh_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            // Failures are already recorded in the load status
            let _ = engine.refresh().await;
        });
    }
}
