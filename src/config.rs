use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_DIR_NAME: &str = "favsync";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    pub keys: KeyConfig,
}

/// Favorites API endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the gallery API
    pub base_url: String,
    /// Path of the favorites listing endpoint
    pub list_path: String,
    /// Path of the favorite write endpoint
    pub toggle_path: String,
    /// Bearer token sent with every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Environment variable read when `api_token` is unset
    pub token_env: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Page size for listing requests (server default when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_limit: Option<u32>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            list_path: "/api/favorites".to_string(),
            toggle_path: "/api/favorites/toggle".to_string(),
            api_token: None,
            token_env: "FAVSYNC_API_TOKEN".to_string(),
            timeout_ms: 10_000,
            page_limit: None,
        }
    }
}

/// Overlay lifetime, refresh debounce and reconciliation backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Age after which an unconfirmed toggle is abandoned
    pub overlay_ttl_ms: u64,
    /// Quiet period before a scheduled snapshot refresh runs
    pub refresh_debounce_ms: u64,
    /// First reconciliation delay
    pub backoff_base_ms: u64,
    /// Upper bound on any reconciliation delay
    pub backoff_max_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            // KV propagation is ~60s, keep a buffer on top
            overlay_ttl_ms: 90_000,
            refresh_debounce_ms: 1_500,
            backoff_base_ms: 1_000,
            backoff_max_ms: 8_000,
        }
    }
}

impl SyncConfig {
    pub fn overlay_ttl(&self) -> Duration {
        Duration::from_millis(self.overlay_ttl_ms)
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }

    /// `min(max, base * 2^attempt)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Where the overlay is persisted between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// redb file under the data directory
    Disk,
    /// Process memory only
    Memory,
    /// No cache; the overlay lives in the engine only
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Overlay database path (empty = default data dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Disk,
            path: None,
        }
    }
}

/// Which media keys may be favorited
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Case-insensitive suffixes; empty allows any
    pub allowed_extensions: Vec<String>,
    /// Case-insensitive prefixes; empty allows any
    pub allowed_prefixes: Vec<String>,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: [".mp4", ".mov", ".m4v", ".webm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_prefixes: Vec::new(),
        }
    }
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(APP_DIR_NAME);

        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(&path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Generate example config content for documentation
    pub fn example_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.remote.base_url, "http://localhost:3000");
        assert_eq!(config.remote.list_path, "/api/favorites");
        assert_eq!(config.remote.toggle_path, "/api/favorites/toggle");
        assert!(config.remote.api_token.is_none());
        assert_eq!(config.sync.overlay_ttl_ms, 90_000);
        assert_eq!(config.sync.refresh_debounce_ms, 1_500);
        assert_eq!(config.sync.backoff_base_ms, 1_000);
        assert_eq!(config.sync.backoff_max_ms, 8_000);
        assert_eq!(config.cache.backend, CacheBackend::Disk);
        assert_eq!(config.keys.allowed_extensions.len(), 4);
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let sync = SyncConfig::default();

        assert_eq!(sync.backoff_delay(0), Duration::from_millis(1_000));
        assert_eq!(sync.backoff_delay(1), Duration::from_millis(2_000));
        assert_eq!(sync.backoff_delay(2), Duration::from_millis(4_000));
        assert_eq!(sync.backoff_delay(3), Duration::from_millis(8_000));
        assert_eq!(sync.backoff_delay(4), Duration::from_millis(8_000));
        // Shift overflow must not wrap around to a short delay
        assert_eq!(sync.backoff_delay(200), Duration::from_millis(8_000));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial_toml = r#"
[remote]
base_url = "https://gallery.example"
"#;

        let config: Config = toml::from_str(partial_toml).unwrap();

        assert_eq!(config.remote.base_url, "https://gallery.example");
        assert_eq!(config.remote.timeout_ms, 10_000);
        assert_eq!(config.sync.overlay_ttl_ms, 90_000);
        assert_eq!(config.cache.backend, CacheBackend::Disk);
    }

    #[test]
    fn test_full_config_parsing() {
        let full_toml = r#"
[remote]
base_url = "https://gallery.example"
list_path = "/favorites"
toggle_path = "/favorites"
api_token = "secret"
token_env = "GALLERY_TOKEN"
timeout_ms = 2500
page_limit = 50

[sync]
overlay_ttl_ms = 30000
refresh_debounce_ms = 500
backoff_base_ms = 250
backoff_max_ms = 4000

[cache]
backend = "memory"
path = "/tmp/overlay.redb"

[keys]
allowed_extensions = [".mkv"]
allowed_prefixes = ["2026"]
"#;

        let config: Config = toml::from_str(full_toml).unwrap();

        assert_eq!(config.remote.list_path, "/favorites");
        assert_eq!(config.remote.api_token.as_deref(), Some("secret"));
        assert_eq!(config.remote.token_env, "GALLERY_TOKEN");
        assert_eq!(config.remote.timeout_ms, 2_500);
        assert_eq!(config.remote.page_limit, Some(50));
        assert_eq!(config.sync.overlay_ttl(), Duration::from_secs(30));
        assert_eq!(config.sync.refresh_debounce(), Duration::from_millis(500));
        assert_eq!(config.sync.backoff_delay(5), Duration::from_millis(4_000));
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.cache.path.as_deref(), Some("/tmp/overlay.redb"));
        assert_eq!(config.keys.allowed_extensions, vec![".mkv".to_string()]);
        assert_eq!(config.keys.allowed_prefixes, vec!["2026".to_string()]);
    }

    #[test]
    fn test_example_config_is_valid() {
        let example = Config::example_config();
        let parsed: Result<Config, _> = toml::from_str(&example);
        assert!(parsed.is_ok(), "Example config should be valid TOML");
    }

    #[test]
    fn test_unknown_cache_backend_is_rejected() {
        let result: Result<Config, _> = toml::from_str("[cache]\nbackend = \"s3\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[sync]\noverlay_ttl_ms = 1000\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.sync.overlay_ttl_ms, 1_000);

        assert!(Config::load_from(&dir.path().join("missing.toml")).is_err());
    }
}
