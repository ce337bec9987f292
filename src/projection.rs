//! Merge of the server snapshot and the local overlay.
//!
//! The effective set is never stored; callers recompute it whenever either
//! input changes.

use std::collections::BTreeSet;

use crate::overlay::OverlayEntries;

/// `(snapshot − {k | overlay[k].desired = false}) ∪ {k | overlay[k].desired = true}`
pub fn effective_favorites(snapshot: &BTreeSet<String>, overlay: &OverlayEntries) -> BTreeSet<String> {
    let mut merged = snapshot.clone();
    for (key, entry) in overlay {
        if entry.desired {
            merged.insert(key.clone());
        } else {
            merged.remove(key);
        }
    }
    merged
}

/// Membership of a single key in the effective set.
pub fn is_effective_favorite(snapshot: &BTreeSet<String>, overlay: &OverlayEntries, key: &str) -> bool {
    match overlay.get(key) {
        Some(entry) => entry.desired,
        None => snapshot.contains(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::OverlayEntry;

    fn set(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_empty_overlay_is_snapshot() {
        let snapshot = set(&["a.mp4", "b.mp4"]);
        assert_eq!(effective_favorites(&snapshot, &OverlayEntries::new()), snapshot);
    }

    #[test]
    fn test_overlay_adds_and_removes() {
        let snapshot = set(&["a.mp4", "b.mp4"]);
        let mut overlay = OverlayEntries::new();
        overlay.insert("b.mp4".to_string(), OverlayEntry::pending(false, 0, 1));
        overlay.insert("c.mp4".to_string(), OverlayEntry::pending(true, 0, 1));
        // Agreeing entries change nothing
        overlay.insert("a.mp4".to_string(), OverlayEntry::pending(true, 0, 1));
        overlay.insert("z.mp4".to_string(), OverlayEntry::pending(false, 0, 1));

        let merged = effective_favorites(&snapshot, &overlay);

        assert_eq!(merged, set(&["a.mp4", "c.mp4"]));
        for key in ["a.mp4", "b.mp4", "c.mp4", "z.mp4", "other.mp4"] {
            assert_eq!(
                is_effective_favorite(&snapshot, &overlay, key),
                merged.contains(key),
                "{key}"
            );
        }
    }
}
