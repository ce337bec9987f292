//! Boundary to the remote favorites store.
//!
//! - [`HttpFavoritesClient`]: the gallery's HTTP API (bearer-token auth)
//! - [`MemoryRemote`]: in-process store with configurable propagation delay
//!
//! Authorization failures are not distinguished from any other failure:
//! every non-success is an `Err`.

pub mod http;
pub mod memory;

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpFavoritesClient;
pub use memory::MemoryRemote;

/// Upper bound on pages followed for one snapshot.
const MAX_SNAPSHOT_PAGES: usize = 1_000;

/// One page of the favorites listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoritesPage {
    /// The worker calls this `keys`, the gallery API `favorites`
    #[serde(alias = "favorites")]
    pub keys: Vec<String>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default = "default_list_complete")]
    pub list_complete: bool,
}

fn default_list_complete() -> bool {
    true
}

/// Body of a favorite write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleFavoriteRequest {
    pub key: String,
    pub favorite: bool,
}

#[async_trait]
pub trait FavoritesRemote: Send + Sync {
    /// Human-readable backend name (e.g., "http", "memory").
    fn backend_name(&self) -> &str;

    /// Fetch one page of favorite keys.
    async fn list_favorites(&self, cursor: Option<&str>, limit: Option<u32>) -> Result<FavoritesPage>;

    /// Express the desired state of `key`. Only success or failure matters.
    async fn set_favorite(&self, key: &str, favorite: bool) -> Result<()>;
}

/// Fetch the complete favorite set as one point-in-time snapshot.
///
/// Follows cursors until the listing reports completion. Any page failure
/// fails the whole fetch; partial results are never returned.
pub async fn fetch_snapshot(remote: &dyn FavoritesRemote, page_limit: Option<u32>) -> Result<BTreeSet<String>> {
    let mut keys = BTreeSet::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_SNAPSHOT_PAGES {
        let page = remote.list_favorites(cursor.as_deref(), page_limit).await?;
        keys.extend(page.keys);

        if page.list_complete {
            return Ok(keys);
        }
        let Some(next) = page.cursor else {
            anyhow::bail!("favorites listing incomplete but returned no cursor");
        };
        if cursor.as_deref() == Some(next.as_str()) {
            anyhow::bail!("favorites listing repeated cursor {next:?}");
        }
        cursor = Some(next);
    }

    anyhow::bail!("favorites listing exceeded {MAX_SNAPSHOT_PAGES} pages")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serves canned pages in order.
    struct ScriptedRemote {
        pages: Mutex<Vec<FavoritesPage>>,
    }

    impl ScriptedRemote {
        fn new(mut pages: Vec<FavoritesPage>) -> Self {
            pages.reverse();
            Self { pages: Mutex::new(pages) }
        }
    }

    #[async_trait]
    impl FavoritesRemote for ScriptedRemote {
        fn backend_name(&self) -> &str {
            "scripted"
        }

        async fn list_favorites(&self, _cursor: Option<&str>, _limit: Option<u32>) -> Result<FavoritesPage> {
            self.pages
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("no more pages"))
        }

        async fn set_favorite(&self, _key: &str, _favorite: bool) -> Result<()> {
            Ok(())
        }
    }

    fn page(keys: &[&str], cursor: Option<&str>, list_complete: bool) -> FavoritesPage {
        FavoritesPage {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            cursor: cursor.map(|c| c.to_string()),
            list_complete,
        }
    }

    #[test]
    fn test_page_accepts_both_list_field_names() {
        let worker: FavoritesPage =
            serde_json::from_str(r#"{"keys":["a.mp4"],"cursor":null,"listComplete":true}"#).unwrap();
        let api: FavoritesPage =
            serde_json::from_str(r#"{"favorites":["a.mp4"],"cursor":"c1","listComplete":false}"#).unwrap();

        assert_eq!(worker, page(&["a.mp4"], None, true));
        assert_eq!(api, page(&["a.mp4"], Some("c1"), false));
    }

    #[test]
    fn test_page_defaults_to_complete() {
        let page: FavoritesPage = serde_json::from_str(r#"{"keys":[]}"#).unwrap();
        assert!(page.list_complete);
        assert!(page.cursor.is_none());
    }

    #[tokio::test]
    async fn test_fetch_snapshot_follows_cursor() {
        let remote = ScriptedRemote::new(vec![
            page(&["a.mp4", "b.mp4"], Some("c1"), false),
            page(&["c.mp4"], Some("c2"), false),
            page(&["d.mp4"], None, true),
        ]);

        let keys = fetch_snapshot(&remote, Some(2)).await.unwrap();
        assert_eq!(keys.len(), 4);
        assert!(keys.contains("d.mp4"));
    }

    #[tokio::test]
    async fn test_fetch_snapshot_fails_on_any_page_error() {
        let remote = ScriptedRemote::new(vec![page(&["a.mp4"], Some("c1"), false)]);
        assert!(fetch_snapshot(&remote, None).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_snapshot_rejects_repeated_cursor() {
        let remote = ScriptedRemote::new(vec![
            page(&["a.mp4"], Some("c1"), false),
            page(&["b.mp4"], Some("c1"), false),
        ]);
        let err = fetch_snapshot(&remote, None).await.unwrap_err();
        assert!(err.to_string().contains("repeated cursor"));
    }

    #[tokio::test]
    async fn test_fetch_snapshot_rejects_truncated_listing() {
        let remote = ScriptedRemote::new(vec![page(&["a.mp4"], None, false)]);
        let err = fetch_snapshot(&remote, None).await.unwrap_err();
        assert!(err.to_string().contains("no cursor"));
    }
}
