//! Propagation of renames to collaborators that persist a filesystem path.
//!
//! When a directory is renamed, every dependent whose stored path lies below
//! it gets the path rewritten. When the stored file is an entity descriptor
//! and its base name changed, the entity itself is renamed in the graph.
//! Relocations are replayed in the order they happened, so chains and swaps
//! within one round resolve correctly.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::entity::{Commit, EntityId, GraphChange};
use crate::error::Result;
use crate::model::EntityModel;
use crate::tracking::{RelocationKind, TrackedRelocation};

/// A collaborator storing a filesystem path it must keep in sync.
pub trait DependentPath: Send + Sync {
    /// Entity whose identity is defined by the stored file, if any.
    fn entity(&self) -> Option<EntityId>;

    fn stored_path(&self) -> String;

    fn set_stored_path(&self, path: &str) -> Result<()>;
}

/// Hook bumped when dependents were rewritten.
pub trait ModificationCounter: Send + Sync {
    fn increment(&self);
}

/// Global counter of structural modifications, readable by observers.
#[derive(Debug, Default)]
pub struct StructuralModificationTracker {
    count: AtomicU64,
}

impl StructuralModificationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }
}

impl ModificationCounter for StructuralModificationTracker {
    fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }
}

/// Registry of [`DependentPath`] collaborators.
#[derive(Default)]
pub struct DependentRegistry {
    dependents: RwLock<Vec<Arc<dyn DependentPath>>>,
}

impl DependentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dependent: Arc<dyn DependentPath>) {
        self.dependents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dependent);
    }

    pub fn dependents(&self) -> Vec<Arc<dyn DependentPath>> {
        self.dependents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.dependents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identity rename issued for an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRename {
    pub id: EntityId,
    pub from: String,
    pub to: String,
}

/// A dependent that could not be reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationFailure {
    pub path: String,
    pub reason: String,
}

/// Outcome of one propagation round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationReport {
    /// Stored paths rewritten, as `(old, new)`.
    pub updated: Vec<(String, String)>,

    pub renamed: Vec<EntityRename>,

    pub failures: Vec<PropagationFailure>,

    /// Relocations that took part in rewriting at least one dependent.
    pub consumed: usize,

    /// Relocations that rewrote nothing.
    pub dropped: usize,
}

/// Rewrites dependent paths after renames.
pub struct RenamePropagator {
    model: Arc<dyn EntityModel>,
    registry: Arc<DependentRegistry>,
    counter: Arc<dyn ModificationCounter>,
    descriptor_extensions: Vec<String>,
}

impl RenamePropagator {
    pub fn new(
        model: Arc<dyn EntityModel>,
        registry: Arc<DependentRegistry>,
        counter: Arc<dyn ModificationCounter>,
        descriptor_extensions: Vec<String>,
    ) -> Self {
        Self {
            model,
            registry,
            counter,
            descriptor_extensions,
        }
    }

    /// Reconcile every dependent against `relocations`, given in the order
    /// they happened.
    ///
    /// Each dependent is resolved once from the path it stored before this
    /// round, replaying the relocations in order. It is rewritten only when
    /// at least one rename took part, so moves alone leave it untouched. A
    /// failure for one dependent never stops the others. The modification
    /// counter is bumped once per round in which anything was updated.
    pub fn propagate(&self, relocations: &[TrackedRelocation]) -> PropagationReport {
        let mut report = PropagationReport::default();
        let mut used = vec![false; relocations.len()];

        for dependent in self.registry.dependents() {
            self.reconcile(dependent.as_ref(), relocations, &mut used, &mut report);
        }

        for (relocation, used) in relocations.iter().zip(&used) {
            if !used {
                debug!(
                    "Dropping relocation {} -> {}: no dependent affected",
                    relocation.old, relocation.new
                );
            }
        }
        report.consumed = used.iter().filter(|used| **used).count();
        report.dropped = relocations.len() - report.consumed;

        if !report.updated.is_empty() {
            self.counter.increment();
            info!(
                "Updated {} dependent path(s), renamed {} entit(ies), {} failure(s)",
                report.updated.len(),
                report.renamed.len(),
                report.failures.len()
            );
        }
        report
    }

    fn reconcile(
        &self,
        dependent: &dyn DependentPath,
        relocations: &[TrackedRelocation],
        used: &mut [bool],
        report: &mut PropagationReport,
    ) {
        let stored = dependent.stored_path();
        let mut current = stored.clone();
        let mut renamed = false;
        let mut applied = Vec::new();

        for (position, relocation) in relocations.iter().enumerate() {
            if let Some(next) = relocation.apply(&current) {
                renamed |= relocation.kind == RelocationKind::Rename;
                applied.push(position);
                current = next;
            }
        }
        if !renamed || current == stored {
            return;
        }
        for position in applied {
            used[position] = true;
        }

        if let Err(e) = dependent.set_stored_path(&current) {
            warn!("Failed to move dependent path {stored} -> {current}: {e}");
            report.failures.push(PropagationFailure {
                path: stored,
                reason: e.to_string(),
            });
            return;
        }
        debug!("Moved dependent path {stored} -> {current}");

        if let Some(id) = dependent.entity() {
            if let Some((from, to)) = self.identity_rename(&stored, &current) {
                match self.rename_entity(&id, &from, &to) {
                    Ok(rename) => report.renamed.push(rename),
                    Err(e) => {
                        warn!("Failed to rename entity {id} from {from} to {to}: {e}");
                        report.failures.push(PropagationFailure {
                            path: current.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
        report.updated.push((stored, current));
    }

    /// Old and new logical names when `old`/`new` are descriptor files whose
    /// base names differ.
    fn identity_rename(&self, old: &str, new: &str) -> Option<(String, String)> {
        let new_path = Path::new(new);
        let extension = new_path.extension()?.to_str()?;
        let is_descriptor = self
            .descriptor_extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(extension));
        if !is_descriptor {
            return None;
        }

        let from = Path::new(old).file_stem()?.to_str()?;
        let to = new_path.file_stem()?.to_str()?;
        (from != to).then(|| (from.to_string(), to.to_string()))
    }

    fn rename_entity(&self, id: &EntityId, from: &str, to: &str) -> Result<EntityRename> {
        let base_version = self.model.current().version();
        let commit = Commit::new(base_version).with(GraphChange::Rename {
            id: id.clone(),
            from: from.to_string(),
            to: to.to_string(),
        });
        self.model.commit(commit)?;
        info!("Renamed entity {id} from {from} to {to}");
        Ok(EntityRename {
            id: id.clone(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, EntityGraph, EntityKind};
    use crate::error::RootsError;
    use crate::model::InMemoryModel;
    use crate::path::PathTable;
    use crate::tracking::RenameTrackingTable;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct StoredFile {
        entity: Option<EntityId>,
        path: Mutex<String>,
        fail: bool,
    }

    impl StoredFile {
        fn new(entity: Option<&str>, path: &str) -> Arc<Self> {
            Arc::new(Self {
                entity: entity.map(EntityId::new),
                path: Mutex::new(path.to_string()),
                fail: false,
            })
        }

        fn failing(path: &str) -> Arc<Self> {
            Arc::new(Self {
                entity: None,
                path: Mutex::new(path.to_string()),
                fail: true,
            })
        }

        fn path(&self) -> String {
            self.path.lock().unwrap().clone()
        }
    }

    impl DependentPath for StoredFile {
        fn entity(&self) -> Option<EntityId> {
            self.entity.clone()
        }

        fn stored_path(&self) -> String {
            self.path()
        }

        fn set_stored_path(&self, path: &str) -> Result<()> {
            if self.fail {
                return Err(RootsError::DependentUpdate {
                    path: self.path(),
                    reason: "read-only".to_string(),
                });
            }
            *self.path.lock().unwrap() = path.to_string();
            Ok(())
        }
    }

    fn setup() -> (
        Arc<InMemoryModel>,
        Arc<DependentRegistry>,
        Arc<StructuralModificationTracker>,
        RenamePropagator,
    ) {
        let graph = EntityGraph::from_entities([Entity::new(
            "module:modA",
            EntityKind::Module,
            "modA",
        )
        .with_root("content_root", "/proj/modA")]);
        let model = Arc::new(InMemoryModel::new(graph, Arc::new(PathTable::new())));
        let registry = Arc::new(DependentRegistry::new());
        let tracker = Arc::new(StructuralModificationTracker::new());
        let propagator = RenamePropagator::new(
            model.clone(),
            registry.clone(),
            tracker.clone(),
            vec!["iml".to_string()],
        );
        (model, registry, tracker, propagator)
    }

    fn relocations(entries: &[(&str, &str, bool)]) -> Vec<TrackedRelocation> {
        let mut table = RenameTrackingTable::new();
        for (old, new, is_directory) in entries {
            table.record(old, new, RelocationKind::Rename, *is_directory);
        }
        table.drain()
    }

    #[test]
    fn test_directory_rename_keeps_descriptor_name() {
        let (model, registry, tracker, propagator) = setup();
        let descriptor = StoredFile::new(Some("module:modA"), "/proj/modA/modA.iml");
        registry.register(descriptor.clone());

        let report = propagator.propagate(&relocations(&[("/proj/modA", "/proj/modB", true)]));

        assert_eq!(descriptor.path(), "/proj/modB/modA.iml");
        assert!(report.renamed.is_empty());
        assert_eq!(report.consumed, 1);
        assert_eq!(tracker.count(), 1);
        assert_eq!(model.current().version(), 0);
    }

    #[test]
    fn test_descriptor_rename_renames_entity() {
        let (model, registry, _, propagator) = setup();
        let descriptor = StoredFile::new(Some("module:modA"), "/proj/modA/modA.iml");
        registry.register(descriptor.clone());

        let report = propagator.propagate(&relocations(&[(
            "/proj/modA/modA.iml",
            "/proj/modA/core.iml",
            false,
        )]));

        assert_eq!(descriptor.path(), "/proj/modA/core.iml");
        assert_eq!(
            report.renamed,
            vec![EntityRename {
                id: EntityId::new("module:modA"),
                from: "modA".to_string(),
                to: "core".to_string(),
            }]
        );
        let graph = model.current();
        assert_eq!(graph.entity(&EntityId::new("module:modA")).unwrap().name, "core");
    }

    #[test]
    fn test_failure_is_local_to_one_dependent() {
        let (_, registry, tracker, propagator) = setup();
        let broken = StoredFile::failing("/proj/modA/a.txt");
        let healthy = StoredFile::new(None, "/proj/modA/b.txt");
        registry.register(broken.clone());
        registry.register(healthy.clone());

        let report = propagator.propagate(&relocations(&[("/proj/modA", "/proj/modC", true)]));

        assert_eq!(report.failures.len(), 1);
        assert_eq!(healthy.path(), "/proj/modC/b.txt");
        assert_eq!(broken.path(), "/proj/modA/a.txt");
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn test_rejected_commit_is_reported() {
        let (_, registry, _, propagator) = setup();
        // descriptor of an entity the graph does not know
        let stray = StoredFile::new(Some("module:ghost"), "/proj/ghost/ghost.iml");
        registry.register(stray.clone());

        let report = propagator.propagate(&relocations(&[(
            "/proj/ghost/ghost.iml",
            "/proj/ghost/spirit.iml",
            false,
        )]));

        assert_eq!(stray.path(), "/proj/ghost/spirit.iml");
        assert!(report.renamed.is_empty());
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_unrelated_relocations_are_dropped() {
        let (_, registry, tracker, propagator) = setup();
        registry.register(StoredFile::new(None, "/proj/modA/modA.iml"));

        let mut table = RenameTrackingTable::new();
        table.record("/proj/other", "/proj/else", RelocationKind::Rename, true);
        table.record("/proj/modA", "/elsewhere/modA", RelocationKind::Move, true);
        let report = propagator.propagate(&table.drain());

        assert_eq!(report.dropped, 2);
        assert!(report.updated.is_empty());
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn test_renames_apply_in_event_order() {
        let (_, registry, _, propagator) = setup();
        let descriptor = StoredFile::new(Some("module:modA"), "/proj/a/modA.iml");
        registry.register(descriptor.clone());

        let report = propagator.propagate(&relocations(&[
            ("/proj/b", "/proj/c", true),
            ("/proj/a", "/proj/b", true),
        ]));

        assert_eq!(descriptor.path(), "/proj/b/modA.iml");
        assert_eq!(report.consumed, 1);
        assert_eq!(report.dropped, 1);
    }

    #[test]
    fn test_swap_within_one_round() {
        let (_, registry, tracker, propagator) = setup();
        let first = StoredFile::new(None, "/proj/a/modA.iml");
        let second = StoredFile::new(None, "/proj/b/modB.iml");
        registry.register(first.clone());
        registry.register(second.clone());

        propagator.propagate(&relocations(&[
            ("/proj/a", "/proj/tmp", true),
            ("/proj/b", "/proj/a", true),
            ("/proj/tmp", "/proj/b", true),
        ]));

        assert_eq!(first.path(), "/proj/b/modA.iml");
        assert_eq!(second.path(), "/proj/a/modB.iml");
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn test_rename_followed_by_move_keeps_final_location() {
        let (_, registry, _, propagator) = setup();
        let descriptor = StoredFile::new(Some("module:modA"), "/proj/modA/modA.iml");
        registry.register(descriptor.clone());

        let mut table = RenameTrackingTable::new();
        table.record("/proj/modA", "/proj/modB", RelocationKind::Rename, true);
        table.record("/proj/modB", "/elsewhere/modB", RelocationKind::Move, true);
        let report = propagator.propagate(&table.drain());

        assert_eq!(descriptor.path(), "/elsewhere/modB/modA.iml");
        assert_eq!(report.consumed, 2);
        assert!(report.renamed.is_empty());
    }
}
