//! Optimistic favorite mutations.
//!
//! The overlay write happens when `toggle_favorite`/`set_favorite` is
//! called, before the returned future is polled, so the effective set
//! reflects the new state independently of network latency.

use futures_util::future::{self, BoxFuture, FutureExt};

use super::{FavoritesEngine, FavoritesEvent};
use crate::error::{SyncError, SyncResult};
use crate::key::is_valid_key;
use crate::overlay::{OverlayEntry, OverlayStatus};

impl FavoritesEngine {
    /// Flip `key` relative to the effective set.
    ///
    /// Resolves to the new state once the remote write succeeded, or to
    /// [`SyncError::Write`] after the change was reverted.
    pub fn toggle_favorite(&self, key: &str) -> BoxFuture<'static, SyncResult<bool>> {
        let desired = !self.is_favorite(key);
        self.set_favorite(key, desired)
    }

    /// Set `key` to `desired`, even if it already is.
    pub fn set_favorite(&self, key: &str, desired: bool) -> BoxFuture<'static, SyncResult<bool>> {
        if !is_valid_key(key, &self.inner.keys) {
            return future::ready(Err(SyncError::InvalidKey(key.to_string()))).boxed();
        }

        let written = self.apply_optimistic(key, desired);
        let engine = self.clone();
        let key = key.to_string();
        async move { engine.commit(key, written).await }.boxed()
    }

    /// Record the desired state in the overlay. Returns the entry written.
    fn apply_optimistic(&self, key: &str, desired: bool) -> OverlayEntry {
        let now = self.inner.overlay.now_ms();
        let mut written = OverlayEntry::pending(desired, now, 1);
        self.inner.overlay.write(|draft| {
            let attempts = draft.get(key).map(|prev| prev.attempts).unwrap_or(0) + 1;
            written.attempts = attempts;
            draft.insert(key.to_string(), written.clone());
        });
        self.set_last_error(None);
        self.emit(FavoritesEvent::OverlayChanged);
        tracing::debug!(key = %key, desired, attempts = written.attempts, "Applied optimistic favorite");
        written
    }

    async fn commit(self, key: String, written: OverlayEntry) -> SyncResult<bool> {
        let desired = written.desired;

        if let Err(e) = self.inner.remote.set_favorite(&key, desired).await {
            tracing::warn!(key = %key, desired, "Favorite write failed, reverting: {e:#}");
            self.inner.overlay.write(|draft| {
                // A newer toggle on this key owns the entry now
                if draft.get(&key) == Some(&written) {
                    draft.remove(&key);
                }
            });
            let message = format!("{e:#}");
            self.set_last_error(Some(message.clone()));
            self.emit(FavoritesEvent::OverlayChanged);
            self.emit(FavoritesEvent::ToggleFailed {
                key: key.clone(),
                error: message,
            });
            return Err(SyncError::Write { key, source: e });
        }

        self.inner.overlay.write(|draft| {
            if let Some(entry) = draft.get_mut(&key) {
                if *entry == written {
                    entry.status = OverlayStatus::Confirmed;
                }
            }
        });

        self.schedule_refresh();
        self.spawn_reconcile(key, desired);
        Ok(desired)
    }
}
