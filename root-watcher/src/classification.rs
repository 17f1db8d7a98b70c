//! Severity of a batch's effect on project roots.

use serde::{Deserialize, Serialize};

/// How a batch of events affected the tracked roots.
///
/// Forms a join-semilattice: `None` is the bottom, `Generic` the absorbing
/// top, and `Added`/`Removed` are incomparable (their join is `Generic`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// No tracked root was touched.
    #[default]
    None,

    /// Roots were only added.
    Added,

    /// Roots were only removed.
    Removed,

    /// Anything else: recompute everything.
    Generic,
}

impl Classification {
    /// Join of two classifications.
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Generic, _) | (_, Self::Generic) => Self::Generic,
            (Self::None, x) | (x, Self::None) => x,
            (a, b) if a == b => a,
            _ => Self::Generic,
        }
    }

    pub fn is_none(self) -> bool {
        self == Self::None
    }

    pub fn is_generic(self) -> bool {
        self == Self::Generic
    }
}
