use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;

use super::OverlayCache;

/// Non-durable cache backed by a map.
#[derive(Default)]
pub struct MemoryCache {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverlayCache for MemoryCache {
    fn backend_name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let blobs = self.blobs.lock().map_err(|e| anyhow::anyhow!("lock poisoned: {e}"))?;
        Ok(blobs.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut blobs = self.blobs.lock().map_err(|e| anyhow::anyhow!("lock poisoned: {e}"))?;
        blobs.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_missing() {
        let cache = MemoryCache::new();
        assert!(cache.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_set_replaces() {
        let cache = MemoryCache::new();
        cache.set("k", "one").unwrap();
        cache.set("k", "two").unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("two"));
    }
}
