//! Local persistence for the favorites overlay.
//!
//! - [`DiskCache`]: redb file under the user data dir (survives restarts)
//! - [`MemoryCache`]: process memory only
//!
//! The overlay is stored as one serialized blob. A missing cache is not an
//! error: the overlay store keeps working in memory without durability.

pub mod disk;
pub mod memory;

use anyhow::Result;

use crate::config::{CacheBackend, CacheConfig};

pub use disk::DiskCache;
pub use memory::MemoryCache;

/// Blob key the overlay is stored under. Bump the version on format changes.
pub const OVERLAY_STORAGE_KEY: &str = "favorites:overlay:v1";

/// Scoped key-value resource holding serialized blobs.
pub trait OverlayCache: Send + Sync {
    /// Human-readable backend name (e.g., "disk", "memory").
    fn backend_name(&self) -> &str;

    /// Read a blob. Returns None if nothing stored.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace a blob.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Open the configured backend.
///
/// Returns None when caching is disabled or the backend cannot be opened;
/// callers fall back to an in-memory overlay.
pub fn open(config: &CacheConfig) -> Option<Box<dyn OverlayCache>> {
    match config.backend {
        CacheBackend::Disabled => None,
        CacheBackend::Memory => Some(Box::new(MemoryCache::new())),
        CacheBackend::Disk => {
            let opened = match config.path.as_deref() {
                Some(path) => DiskCache::open(std::path::Path::new(path)),
                None => DiskCache::open_default(),
            };
            match opened {
                Ok(cache) => Some(Box::new(cache)),
                Err(e) => {
                    tracing::warn!("Overlay cache unavailable, keeping favorites in memory: {e:#}");
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_disabled() {
        let config = CacheConfig {
            backend: CacheBackend::Disabled,
            path: None,
        };
        assert!(open(&config).is_none());
    }

    #[test]
    fn test_open_memory() {
        let config = CacheConfig {
            backend: CacheBackend::Memory,
            path: None,
        };
        let cache = open(&config).unwrap();
        assert_eq!(cache.backend_name(), "memory");
    }

    #[test]
    fn test_open_disk_at_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            backend: CacheBackend::Disk,
            path: Some(dir.path().join("overlay.redb").display().to_string()),
        };
        let cache = open(&config).unwrap();
        assert_eq!(cache.backend_name(), "disk");
    }

    #[test]
    fn test_open_disk_unavailable_degrades() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file
        let config = CacheConfig {
            backend: CacheBackend::Disk,
            path: Some(dir.path().display().to_string()),
        };
        assert!(open(&config).is_none());
    }
}
