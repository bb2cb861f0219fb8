//! Directory watch priority classification
//!
//! Every directory under the watched root is given a tier before its watch
//! is registered. Shallow directories are onboarded first, then directories
//! whose names look like active work, then everything else down to the
//! configured maximum depth.

use std::fmt;

use super::newtypes::SyncPath;

/// Priority tier assigned to a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchPriority {
    /// Tier 1
    High,
    /// Tier 2
    Medium,
    /// Tier 3
    Low,
    /// Not watched. `prune_subtree` is set when the directory is too deep,
    /// which makes the initial walk skip everything below it as well.
    Excluded { prune_subtree: bool },
}

impl WatchPriority {
    /// Numeric tier (1-3), `None` when excluded
    #[must_use]
    pub fn tier(self) -> Option<u8> {
        match self {
            Self::High => Some(1),
            Self::Medium => Some(2),
            Self::Low => Some(3),
            Self::Excluded { .. } => None,
        }
    }

    #[must_use]
    pub fn is_excluded(self) -> bool {
        matches!(self, Self::Excluded { .. })
    }
}

impl fmt::Display for WatchPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::Excluded { .. } => write!(f, "excluded"),
        }
    }
}

/// Classify `dir` relative to `root`
///
/// Rules are applied in order:
/// 1. deeper than `max_depth` → excluded, subtree pruned
/// 2. depth ≤ 2 → high
/// 3. depth ≤ 4 and the lower-cased name contains a keyword or a year → medium
/// 4. depth ≤ `max_depth` → low
/// 5. anything else (outside the root) → excluded without pruning
#[must_use]
pub fn classify(
    dir: &SyncPath,
    root: &SyncPath,
    max_depth: usize,
    keywords: &[String],
) -> WatchPriority {
    let Some(depth) = dir.depth_below(root) else {
        return WatchPriority::Excluded {
            prune_subtree: false,
        };
    };

    if depth > max_depth {
        return WatchPriority::Excluded {
            prune_subtree: true,
        };
    }
    if depth <= 2 {
        return WatchPriority::High;
    }

    if depth <= 4 {
        let name = dir
            .as_path()
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let keyword_hit = keywords
            .iter()
            .any(|k| !k.is_empty() && name.contains(&k.to_lowercase()));
        if keyword_hit || has_year_token(&name) {
            return WatchPriority::Medium;
        }
    }

    WatchPriority::Low
}

/// Whether `name` contains a four-digit year in 1900-2099
#[must_use]
pub fn has_year_token(name: &str) -> bool {
    name.as_bytes().windows(4).any(|w| {
        w.iter().all(u8::is_ascii_digit) && matches!(&w[..2], b"19" | b"20")
    })
}
