//! Local overlay of favorite changes not yet visible in the server snapshot.
//!
//! Each entry records the state the user asked for. Entries older than the
//! TTL are invalid and pruned on every read and write. The map is replaced
//! wholesale on each write (copy-on-write), so an `Arc` handed out by
//! [`OverlayStore::read`] never changes underneath its holder.
//!
//! Persistence is best-effort: with no cache, or a failing one, the store
//! keeps working in memory.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::{OverlayCache, OVERLAY_STORAGE_KEY};
use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayStatus {
    /// Waiting for the remote write to be acknowledged
    Pending,
    /// Remote write acknowledged, waiting for it to show up in a snapshot
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayEntry {
    pub desired: bool,
    /// Milliseconds since the Unix epoch
    pub updated_at: i64,
    pub status: OverlayStatus,
    pub attempts: u32,
}

impl OverlayEntry {
    pub fn pending(desired: bool, updated_at: i64, attempts: u32) -> Self {
        Self {
            desired,
            updated_at,
            status: OverlayStatus::Pending,
            attempts,
        }
    }

    /// Negative when `updated_at` lies after `now_ms`.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.updated_at)
    }

    /// Older than the TTL, or dated in the future (skew, corrupt cache).
    pub fn is_expired(&self, now_ms: i64, ttl_ms: i64) -> bool {
        let age = self.age_ms(now_ms);
        age < 0 || age > ttl_ms
    }
}

/// Outstanding entries keyed by favorite key. At most one entry per key.
pub type OverlayEntries = BTreeMap<String, OverlayEntry>;

/// Called with the keys an expiry prune dropped, after the map is published.
pub type ExpiryListener = Box<dyn Fn(&[String]) + Send + Sync>;

/// Drop expired entries. Returns the removed keys.
pub fn prune(entries: &mut OverlayEntries, now_ms: i64, ttl_ms: i64) -> Vec<String> {
    let expired: Vec<String> = entries
        .iter()
        .filter(|(_, entry)| entry.is_expired(now_ms, ttl_ms))
        .map(|(key, _)| key.clone())
        .collect();
    for key in &expired {
        entries.remove(key);
    }
    expired
}

/// Parse a persisted blob, skipping entries that don't decode.
fn decode(raw: &str) -> OverlayEntries {
    let parsed: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(raw) {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!("Overlay cache corrupt, starting empty: {e}");
            return OverlayEntries::new();
        }
    };

    parsed
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value::<OverlayEntry>(value) {
            Ok(entry) => Some((key, entry)),
            Err(e) => {
                tracing::debug!(key = %key, "Skipping malformed overlay entry: {e}");
                None
            }
        })
        .collect()
}

fn encode(entries: &OverlayEntries) -> Result<String> {
    serde_json::to_string(entries).context("Failed to serialize overlay")
}

#[derive(Default)]
struct OverlayState {
    entries: Arc<OverlayEntries>,
    /// Bumped on every publish; orders cache commits
    version: u64,
}

pub struct OverlayStore {
    cache: Option<Box<dyn OverlayCache>>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    state: Mutex<OverlayState>,
    /// Version of the last map committed to the cache
    persisted: Mutex<u64>,
    on_expire: Option<ExpiryListener>,
}

impl OverlayStore {
    /// Create a store, hydrating from `cache` when one is available.
    ///
    /// Entries that are already invalid when loaded are dropped without
    /// notification.
    pub fn new(cache: Option<Box<dyn OverlayCache>>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        let store = Self {
            cache,
            clock,
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            state: Mutex::new(OverlayState::default()),
            persisted: Mutex::new(0),
            on_expire: None,
        };

        if let Some(mut entries) = store.load_cached() {
            let dropped = prune(&mut entries, store.clock.now_ms(), store.ttl_ms);
            if !dropped.is_empty() {
                tracing::debug!(count = dropped.len(), "Dropped stale overlay entries from cache");
            }
            store.publish(store.lock(), entries, Vec::new());
        }

        store
    }

    /// Store with no persistence.
    pub fn in_memory(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self::new(None, clock, ttl)
    }

    /// Report entries dropped by later reads and writes to `listener`.
    pub fn with_expiry_listener(mut self, listener: ExpiryListener) -> Self {
        self.on_expire = Some(listener);
        self
    }

    pub fn is_durable(&self) -> bool {
        self.cache.is_some()
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Current TTL-valid entries.
    ///
    /// Expired entries are purged and the pruned map is persisted back.
    pub fn read(&self) -> Arc<OverlayEntries> {
        let state = self.lock();
        let now = self.clock.now_ms();
        if state.entries.values().all(|entry| !entry.is_expired(now, self.ttl_ms)) {
            return Arc::clone(&state.entries);
        }

        let mut pruned = (*state.entries).clone();
        let expired = prune(&mut pruned, now, self.ttl_ms);
        self.publish(state, pruned, expired)
    }

    /// TTL-valid entry for `key`.
    pub fn get(&self, key: &str) -> Option<OverlayEntry> {
        self.read().get(key).cloned()
    }

    /// Entry for `key` as stored, even if it has outlived the TTL.
    pub fn entry(&self, key: &str) -> Option<OverlayEntry> {
        self.lock().entries.get(key).cloned()
    }

    /// Apply `mutator` to a copy of the entries, prune, persist and publish.
    pub fn write<F>(&self, mutator: F) -> Arc<OverlayEntries>
    where
        F: FnOnce(&mut OverlayEntries),
    {
        let state = self.lock();
        let mut draft = (*state.entries).clone();
        mutator(&mut draft);
        let expired = prune(&mut draft, self.clock.now_ms(), self.ttl_ms);
        self.publish(state, draft, expired)
    }

    /// Swap in `entries`, then persist and notify outside the lock.
    fn publish(
        &self,
        mut state: MutexGuard<'_, OverlayState>,
        entries: OverlayEntries,
        expired: Vec<String>,
    ) -> Arc<OverlayEntries> {
        state.version += 1;
        let version = state.version;
        let blob = self.cache.is_some().then(|| encode(&entries));
        state.entries = Arc::new(entries);
        let published = Arc::clone(&state.entries);
        drop(state);

        if let Some(blob) = blob {
            self.persist(version, blob);
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "Pruned expired overlay entries");
            if let Some(listener) = self.on_expire.as_ref() {
                listener(&expired);
            }
        }
        published
    }

    fn load_cached(&self) -> Option<OverlayEntries> {
        let cache = self.cache.as_ref()?;
        match cache.get(OVERLAY_STORAGE_KEY) {
            Ok(Some(raw)) => Some(decode(&raw)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(backend = cache.backend_name(), "Could not read overlay cache: {e:#}");
                None
            }
        }
    }

    fn persist(&self, version: u64, blob: Result<String>) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let mut persisted = self.persisted.lock().unwrap_or_else(PoisonError::into_inner);
        // A newer map already reached the cache
        if version <= *persisted {
            return;
        }
        // Cache is best-effort (quota, unavailable medium)
        match blob.and_then(|blob| cache.set(OVERLAY_STORAGE_KEY, &blob)) {
            Ok(()) => *persisted = version,
            Err(e) => {
                tracing::warn!(backend = cache.backend_name(), "Could not persist overlay: {e:#}");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, OverlayState> {
        // Every critical section publishes a complete map, so a poisoned
        // lock still guards consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
