//! Per-key convergence of the overlay toward the server snapshot.
//!
//! Every attempt takes a fresh [`ReconcileTicket`] for its key. Issuing a
//! ticket supersedes all earlier ones; a superseded attempt notices on its
//! next resume point and returns without side effects. Timers of superseded
//! attempts are left to fire rather than cancelled.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

use super::{FavoritesEngine, FavoritesEvent};

/// Cancellation epoch for one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileTicket {
    key: String,
    token: u64,
}

impl ReconcileTicket {
    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Latest token issued per key.
#[derive(Debug, Default)]
pub struct ReconcileTokens {
    latest: Mutex<HashMap<String, u64>>,
}

impl ReconcileTokens {
    /// Issue `previous + 1` for `key`, superseding earlier tickets.
    pub fn issue(&self, key: &str) -> ReconcileTicket {
        let mut latest = self.lock();
        let token = latest.get(key).copied().unwrap_or(0) + 1;
        latest.insert(key.to_string(), token);
        ReconcileTicket {
            key: key.to_string(),
            token,
        }
    }

    pub fn is_current(&self, ticket: &ReconcileTicket) -> bool {
        self.lock().get(&ticket.key) == Some(&ticket.token)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// How a reconciliation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Snapshot agreed with the desired state; overlay entry removed.
    Converged,
    /// TTL elapsed first; overlay entry removed.
    Expired,
    /// A newer attempt for the key took over.
    Superseded,
    /// The entry vanished or now wants the other state.
    Abandoned,
}

impl FavoritesEngine {
    pub(crate) fn spawn_reconcile(&self, key: String, desired: bool) -> JoinHandle<ReconcileOutcome> {
        tokio::spawn(self.clone().reconcile(key, desired, 0))
    }

    /// Converge `key` toward `desired`, starting at backoff `attempt`.
    ///
    /// Retries are unbounded in count; only the overlay TTL ends them.
    pub async fn reconcile(self, key: String, desired: bool, mut attempt: u32) -> ReconcileOutcome {
        loop {
            let ticket = self.inner.tokens.issue(&key);
            let delay = self.inner.sync.backoff_delay(attempt);
            tracing::debug!(key = %key, attempt, delay_ms = delay.as_millis() as u64, "Reconcile scheduled");

            tokio::time::sleep(delay).await;
            if !self.inner.tokens.is_current(&ticket) {
                tracing::debug!(key = %key, token = ticket.token(), "Reconcile superseded");
                return ReconcileOutcome::Superseded;
            }

            let Some(entry) = self.inner.overlay.entry(&key) else {
                return ReconcileOutcome::Abandoned;
            };
            if entry.desired != desired {
                return ReconcileOutcome::Abandoned;
            }

            let ttl_ms = self.inner.overlay.ttl_ms();
            if entry.is_expired(self.inner.overlay.now_ms(), ttl_ms) {
                return self.finish(&key, desired, ReconcileOutcome::Expired);
            }

            if let Err(e) = self.refresh().await {
                tracing::debug!(key = %key, attempt, "Reconcile refresh failed, will retry: {e}");
            }
            if !self.inner.tokens.is_current(&ticket) {
                tracing::debug!(key = %key, token = ticket.token(), "Reconcile superseded during refresh");
                return ReconcileOutcome::Superseded;
            }

            if self.inner.snapshot.contains(&key) == desired {
                return self.finish(&key, desired, ReconcileOutcome::Converged);
            }

            if entry.is_expired(self.inner.overlay.now_ms(), ttl_ms) {
                return self.finish(&key, desired, ReconcileOutcome::Expired);
            }

            attempt = attempt.saturating_add(1);
        }
    }

    /// Remove the overlay entry if it still wants `desired`.
    ///
    /// Reports `Abandoned` when the entry was not removed: a newer toggle
    /// owns it, or an expiry prune already dropped and reported it.
    fn finish(&self, key: &str, desired: bool, outcome: ReconcileOutcome) -> ReconcileOutcome {
        let mut removed = false;
        self.inner.overlay.write(|draft| {
            if draft.get(key).is_some_and(|entry| entry.desired == desired) {
                draft.remove(key);
                removed = true;
            }
        });
        if !removed {
            return ReconcileOutcome::Abandoned;
        }

        match outcome {
            ReconcileOutcome::Converged => {
                tracing::info!(key = %key, desired, "Favorite converged");
                self.emit(FavoritesEvent::Converged { key: key.to_string() });
            }
            ReconcileOutcome::Expired => {
                tracing::info!(key = %key, desired, "Favorite change expired before converging");
                self.emit(FavoritesEvent::Expired { key: key.to_string() });
            }
            ReconcileOutcome::Superseded | ReconcileOutcome::Abandoned => {}
        }
        self.emit(FavoritesEvent::OverlayChanged);
        outcome
    }
}
