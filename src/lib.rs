//! favsync: optimistic favorites for an eventually consistent remote store.
//!
//! Toggles show up immediately through a local overlay, are written to the
//! remote, and are reconciled against refreshed snapshots until the remote
//! agrees or the overlay entry expires.

pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod overlay;
pub mod projection;
pub mod remote;
pub mod snapshot;

pub use config::Config;
pub use engine::{FavoritesEngine, FavoritesEvent, ReconcileOutcome};
pub use error::{SyncError, SyncResult};
pub use overlay::{OverlayEntry, OverlayStatus};
pub use remote::{FavoritesRemote, HttpFavoritesClient, MemoryRemote};
pub use snapshot::LoadStatus;
