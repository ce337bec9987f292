//! In-process favorites store with eventual consistency.
//!
//! Writes are acknowledged immediately but only appear in listings after
//! the configured propagation delay, like the KV store behind the real API.
//! Reads and writes can be made to fail on demand. Time is tokio time, so a
//! paused runtime controls propagation too.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;

use super::{FavoritesPage, FavoritesRemote};

#[derive(Debug, Default)]
struct MemoryState {
    /// Per key: writes in order, each with the instant it becomes visible
    writes: BTreeMap<String, Vec<(Instant, bool)>>,
    fail_reads: u32,
    fail_writes: u32,
    read_count: u64,
    write_count: u64,
}

pub struct MemoryRemote {
    state: Mutex<MemoryState>,
    propagation: Duration,
    latency: Duration,
}

impl MemoryRemote {
    pub fn new(propagation: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            propagation,
            latency: Duration::ZERO,
        }
    }

    /// Delay every call by `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Mark keys as favorited and already visible.
    pub fn seed<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Instant::now();
        let mut state = self.lock();
        for key in keys {
            state.writes.entry(key.into()).or_default().push((now, true));
        }
    }

    /// Fail the next `n` listing requests.
    pub fn fail_next_reads(&self, n: u32) {
        self.lock().fail_reads = n;
    }

    /// Fail the next `n` writes.
    pub fn fail_next_writes(&self, n: u32) {
        self.lock().fail_writes = n;
    }

    pub fn read_count(&self) -> u64 {
        self.lock().read_count
    }

    pub fn write_count(&self) -> u64 {
        self.lock().write_count
    }

    /// Favorited keys as currently visible to readers.
    pub fn visible_keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.lock()
            .writes
            .iter()
            .filter(|(_, writes)| {
                writes
                    .iter()
                    .rev()
                    .find(|(visible_at, _)| *visible_at <= now)
                    .is_some_and(|(_, favorite)| *favorite)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl FavoritesRemote for MemoryRemote {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn list_favorites(&self, cursor: Option<&str>, limit: Option<u32>) -> Result<FavoritesPage> {
        self.simulate_latency().await;
        {
            let mut state = self.lock();
            state.read_count += 1;
            if state.fail_reads > 0 {
                state.fail_reads -= 1;
                anyhow::bail!("favorites listing unavailable (503)");
            }
        }

        let visible = self.visible_keys();
        let start = match cursor {
            Some(c) => c.parse::<usize>().map_err(|_| anyhow::anyhow!("invalid cursor {c:?}"))?,
            None => 0,
        };
        let limit = limit.map(|l| l.max(1) as usize).unwrap_or(usize::MAX);
        let end = start.saturating_add(limit).min(visible.len());
        let keys = visible.get(start..end).map(<[String]>::to_vec).unwrap_or_default();
        let list_complete = end >= visible.len();

        Ok(FavoritesPage {
            keys,
            cursor: (!list_complete).then(|| end.to_string()),
            list_complete,
        })
    }

    async fn set_favorite(&self, key: &str, favorite: bool) -> Result<()> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.write_count += 1;
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            anyhow::bail!("favorite write rejected (500)");
        }
        let visible_at = Instant::now() + self.propagation;
        state.writes.entry(key.to_string()).or_default().push((visible_at, favorite));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fetch_snapshot;

    #[tokio::test(start_paused = true)]
    async fn test_writes_become_visible_after_propagation() {
        let remote = MemoryRemote::new(Duration::from_secs(5));
        remote.seed(["a.mp4"]);

        remote.set_favorite("b.mp4", true).await.unwrap();
        remote.set_favorite("a.mp4", false).await.unwrap();
        assert_eq!(remote.visible_keys(), vec!["a.mp4".to_string()]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(remote.visible_keys(), vec!["b.mp4".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_through_listing() {
        let remote = MemoryRemote::new(Duration::ZERO);
        remote.seed(["a.mp4", "b.mp4", "c.mp4"]);

        let first = remote.list_favorites(None, Some(2)).await.unwrap();
        assert_eq!(first.keys.len(), 2);
        assert!(!first.list_complete);

        let second = remote.list_favorites(first.cursor.as_deref(), Some(2)).await.unwrap();
        assert_eq!(second.keys, vec!["c.mp4".to_string()]);
        assert!(second.list_complete);
        assert!(second.cursor.is_none());

        assert_eq!(fetch_snapshot(&remote, Some(1)).await.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_injection() {
        let remote = MemoryRemote::new(Duration::ZERO);
        remote.fail_next_reads(1);
        remote.fail_next_writes(1);

        assert!(remote.list_favorites(None, None).await.is_err());
        assert!(remote.list_favorites(None, None).await.is_ok());
        assert!(remote.set_favorite("a.mp4", true).await.is_err());
        assert!(remote.set_favorite("a.mp4", true).await.is_ok());

        assert_eq!(remote.read_count(), 2);
        assert_eq!(remote.write_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_answers() {
        let remote = MemoryRemote::new(Duration::ZERO).with_latency(Duration::from_millis(300));
        let started = Instant::now();
        remote.set_favorite("a.mp4", true).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
