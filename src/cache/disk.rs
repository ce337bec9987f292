//! redb-backed overlay cache.
//!
//! One table of `blob key → JSON text`. Each `set` is its own write
//! transaction, so a reader never sees a half-written blob.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};

use super::OverlayCache;

const BLOBS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("overlay_blobs");

pub struct DiskCache {
    db: Database,
}

impl DiskCache {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create overlay cache directory")?;
        }
        let db = Database::create(path)
            .with_context(|| format!("failed to open overlay cache at {}", path.display()))?;
        // Ensure table exists
        let txn = db.begin_write()?;
        {
            let _table = txn.open_table(BLOBS_TABLE)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    /// Open the database at the default location.
    pub fn open_default() -> Result<Self> {
        Self::open(&Self::default_path()?)
    }

    /// Default path: `<data dir>/favsync/overlay.redb`
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .context("Failed to get data directory")?
            .join("favsync");
        Ok(data_dir.join("overlay.redb"))
    }
}

impl OverlayCache for DiskCache {
    fn backend_name(&self) -> &str {
        "disk"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let rtxn = self.db.begin_read()?;
        let table = rtxn.open_table(BLOBS_TABLE)?;
        Ok(table.get(key)?.map(|value| value.value().to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(BLOBS_TABLE)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }
}
