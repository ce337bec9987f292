//! Favorite key validation.
//!
//! Keys are root-level media file names such as `20260110_sunset.mp4`.

use crate::config::KeyConfig;

/// Check a key against the configured prefix/extension rules.
///
/// Blank keys, path separators and traversal segments are always rejected.
pub fn is_valid_key(key: &str, rules: &KeyConfig) -> bool {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return false;
    }

    if trimmed.contains('/') || trimmed.contains('\\') || trimmed.contains("..") {
        return false;
    }

    let lower = trimmed.to_lowercase();

    if !rules.allowed_prefixes.is_empty()
        && !rules
            .allowed_prefixes
            .iter()
            .any(|prefix| lower.starts_with(&prefix.to_lowercase()))
    {
        return false;
    }

    rules.allowed_extensions.is_empty()
        || rules
            .allowed_extensions
            .iter()
            .any(|ext| lower.ends_with(&ext.to_lowercase()))
}
