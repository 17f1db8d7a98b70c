//! Subscribers notified about root changes.

use crate::classification::Classification;

/// Receives the two-phase root change notifications.
///
/// For every batch that touches a tracked root, `before_changed` is called
/// once before the mutation becomes visible and `changed` once after it.
/// `changed` is never called with [`Classification::None`].
pub trait RootsListener: Send + Sync {
    /// Roots are about to change; caches may still read the old state.
    fn before_changed(&self);

    /// Roots changed.
    fn changed(&self, classification: Classification);
}
