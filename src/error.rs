//! Errors surfaced by the favorites engine.
//!
//! Transient refresh failures inside reconciliation, cache unavailability
//! and superseded reconciliation attempts never reach callers as errors;
//! they are retried, degraded to memory, or dropped respectively.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote write failed (network, authorization or status). The
    /// optimistic overlay entry has already been reverted.
    #[error("failed to update favorite {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// A snapshot refresh failed. The previous snapshot is kept.
    #[error("failed to load favorites: {0}")]
    Fetch(#[source] anyhow::Error),

    /// The key is not an acceptable media key.
    #[error("invalid favorite key: {0:?}")]
    InvalidKey(String),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
