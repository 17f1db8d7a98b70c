//! Correlation of paths across moves and renames.

use chrono::{DateTime, Utc};

use crate::path::is_strict_ancestor;

/// What relocated a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationKind {
    Move,
    Rename,
}

/// A path that moved from `old` to `new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRelocation {
    pub old: String,
    pub new: String,
    pub kind: RelocationKind,
    pub is_directory: bool,
    pub recorded_at: DateTime<Utc>,
}

impl TrackedRelocation {
    /// Where `path` lives after this relocation, if it is affected.
    pub fn apply(&self, path: &str) -> Option<String> {
        if self.old == path {
            Some(self.new.clone())
        } else if self.is_directory && is_strict_ancestor(&self.old, path) {
            Some(format!("{}{}", self.new, &path[self.old.len()..]))
        } else {
            None
        }
    }
}

/// Pending relocations waiting to be reconciled against stored paths.
///
/// Entries are kept in the order they happened. Resolving a path replays
/// them in that order, so `a → b` then `b → c` resolves `a` to `c`, and a
/// swap through a temporary name lands where the filesystem put it.
#[derive(Debug, Default)]
pub struct RenameTrackingTable {
    entries: Vec<TrackedRelocation>,
}

impl RenameTrackingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a relocation. Returns `false` when old and new are equal.
    pub fn record(
        &mut self,
        old: &str,
        new: &str,
        kind: RelocationKind,
        is_directory: bool,
    ) -> bool {
        if old == new {
            return false;
        }
        self.entries.push(TrackedRelocation {
            old: old.to_string(),
            new: new.to_string(),
            kind,
            is_directory,
            recorded_at: Utc::now(),
        });
        true
    }

    /// Where `path` lives now, if any recorded relocation moved it.
    pub fn resolve(&self, path: &str) -> Option<String> {
        let resolved = self
            .entries
            .iter()
            .fold(path.to_string(), |current, entry| {
                entry.apply(&current).unwrap_or(current)
            });
        (resolved != path).then_some(resolved)
    }

    /// Remove and return every entry, in the order recorded.
    pub fn drain(&mut self) -> Vec<TrackedRelocation> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
