//! Two-phase processing of event batches.
//!
//! ```text
//! batch ──► before() ──► classify against the old snapshot ──► before_changed()
//!                 (mutation applied by the host)
//! batch ──► after()  ──► tracking + rename propagation ──► changed(classification)
//! ```
//!
//! Classification is skipped entirely (only relocation bookkeeping runs)
//! when the mutation permit is not held, the model is disposed, no listener
//! is installed, or a notification from this watcher is being dispatched.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::classification::Classification;
use crate::config::WatcherConfig;
use crate::entity::{Entity, EntityGraph};
use crate::event::{EventBatch, FsEvent};
use crate::guard::{DispatchGuard, ModelLifecycle, MutationPermit, Suppression};
use crate::index::EntityIndex;
use crate::listener::RootsListener;
use crate::model::EntityModel;
use crate::path::{PathTable, Scheme, VfsUrl};
use crate::rename::{DependentRegistry, ModificationCounter, PropagationReport, RenamePropagator};
use crate::tracking::{RelocationKind, RenameTrackingTable};

/// Decides whether a change to `(entity, property)` counts as a roots change.
pub type AffectsRoots = Arc<dyn Fn(&Entity, &str) -> bool + Send + Sync>;

/// Everything the watcher talks to, passed in at construction.
pub struct Collaborators {
    pub model: Arc<dyn EntityModel>,
    pub paths: Arc<PathTable>,
    pub permit: Arc<dyn MutationPermit>,
    pub lifecycle: Arc<ModelLifecycle>,
    pub dependents: Arc<DependentRegistry>,
    pub modifications: Arc<dyn ModificationCounter>,
}

#[derive(Debug, Clone, Copy)]
struct PendingBatch {
    classification: Classification,
    suppressed: bool,
}

#[derive(Debug, Default)]
struct BatchState {
    pending: Option<PendingBatch>,
    tracking: RenameTrackingTable,
}

/// Watches event batches for changes to tracked roots.
pub struct RootsChangeWatcher {
    model: Arc<dyn EntityModel>,
    paths: Arc<PathTable>,
    permit: Arc<dyn MutationPermit>,
    lifecycle: Arc<ModelLifecycle>,
    listener: RwLock<Option<Arc<dyn RootsListener>>>,
    affects_roots: AffectsRoots,
    propagator: RenamePropagator,
    config: WatcherConfig,
    guard: DispatchGuard,
    state: Mutex<BatchState>,
}

impl RootsChangeWatcher {
    /// Create a watcher. Every property counts toward classification until a
    /// predicate is set with [`RootsChangeWatcher::with_predicate`].
    pub fn new(collaborators: Collaborators, config: WatcherConfig) -> Self {
        let Collaborators {
            model,
            paths,
            permit,
            lifecycle,
            dependents,
            modifications,
        } = collaborators;

        let propagator = RenamePropagator::new(
            model.clone(),
            dependents,
            modifications,
            config.descriptor_extensions.clone(),
        );

        Self {
            model,
            paths,
            permit,
            lifecycle,
            listener: RwLock::new(None),
            affects_roots: Arc::new(|_: &Entity, _: &str| true),
            propagator,
            config,
            guard: DispatchGuard::new(),
            state: Mutex::new(BatchState::default()),
        }
    }

    /// Only count properties accepted by `predicate`.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&Entity, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.affects_roots = Arc::new(predicate);
        self
    }

    /// Install (or remove) the classifying listener.
    pub fn set_listener(&self, listener: Option<Arc<dyn RootsListener>>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = listener;
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Relocations recorded but not yet reconciled.
    pub fn pending_relocations(&self) -> usize {
        self.lock_state().tracking.len()
    }

    /// Why a batch arriving now would not be classified, if it would not.
    pub fn suppression(&self) -> Option<Suppression> {
        if self.guard.is_dispatching() {
            Some(Suppression::Reentrant)
        } else if !self.permit.is_held() {
            Some(Suppression::NoPermit)
        } else if self.lifecycle.is_disposed() {
            Some(Suppression::Disposed)
        } else if self.listener().is_none() {
            Some(Suppression::NotWired)
        } else {
            None
        }
    }

    /// Before phase: classify `batch` against the current (pre-mutation)
    /// snapshot and send `before_changed` if it touches any root.
    pub fn before(&self, batch: &EventBatch) -> Classification {
        if self.guard.is_dispatching() {
            debug!("Ignoring before-phase of a batch nested in a dispatch");
            return Classification::None;
        }

        let suppression = self.suppression();
        let classification = match suppression {
            Some(reason) => {
                debug!("Classification suppressed ({reason:?}) for {} event(s)", batch.len());
                Classification::None
            }
            None => self.classify(batch),
        };

        self.lock_state().pending = Some(PendingBatch {
            classification,
            suppressed: suppression.is_some(),
        });

        if !classification.is_none() {
            self.dispatch(|listener| listener.before_changed());
        }
        classification
    }

    /// After phase: record relocations, propagate renames and send
    /// `changed` with the classification computed in the before phase.
    pub fn after(&self, batch: &EventBatch) -> Classification {
        if self.guard.is_dispatching() {
            debug!("Batch nested in a dispatch, tracking relocations only");
            record_relocations(&mut self.lock_state().tracking, batch);
            return Classification::None;
        }

        let (classification, relocations) = {
            let mut state = self.lock_state();
            record_relocations(&mut state.tracking, batch);

            let pending = state.pending.take();
            let suppressed = match pending {
                Some(pending) => pending.suppressed,
                None => self.suppression().is_some(),
            };
            let classification = pending.map_or(Classification::None, |p| p.classification);
            let relocations = if suppressed {
                Vec::new()
            } else {
                state.tracking.drain()
            };
            (classification, relocations)
        };

        if !relocations.is_empty() {
            let report = self.propagator.propagate(&relocations);
            log_report(&report);
        }

        if !classification.is_none() {
            info!(
                "Roots changed ({classification:?}) by batch of {} event(s)",
                batch.len()
            );
            self.dispatch(|listener| listener.changed(classification));
        }
        classification
    }

    /// Classification of `batch` against the current snapshot. Pure with
    /// respect to the snapshot: same batch, same snapshot, same answer.
    pub fn classify(&self, batch: &EventBatch) -> Classification {
        let (graph, index) = self.model.snapshot();
        let mut classification = Classification::None;

        for event in &batch.events {
            if classification.is_generic() && self.config.short_circuit_on_generic {
                break;
            }
            classification = classification.merge(self.classify_event(event, &graph, &index));
        }
        classification
    }

    fn classify_event(
        &self,
        event: &FsEvent,
        graph: &EntityGraph,
        index: &EntityIndex,
    ) -> Classification {
        let (urls, nominal) = match event {
            FsEvent::Create { parent, name, .. } => {
                (self.created_urls(parent, name), Classification::Added)
            }
            FsEvent::Delete { path } => (self.urls_for(path), Classification::Removed),
            FsEvent::Copy { target, .. } => (self.urls_for(target), Classification::Added),
            FsEvent::Move { old, new } | FsEvent::Rename { old, new, .. } => {
                let mut urls = self.urls_for(old);
                urls.extend(self.urls_for(new));
                (urls, Classification::Generic)
            }
        };

        let touched = urls
            .iter()
            .any(|url| self.touches_roots(url, graph, index));
        if touched {
            debug!("{event:?} touches tracked roots ({nominal:?})");
            nominal
        } else {
            Classification::None
        }
    }

    fn touches_roots(&self, url: &VfsUrl, graph: &EntityGraph, index: &EntityIndex) -> bool {
        index
            .affected(&self.paths, url)
            .refs
            .iter()
            .any(|reference| {
                graph
                    .entity(&reference.entity)
                    .is_some_and(|entity| {
                        (self.affects_roots)(entity.as_ref(), reference.property.as_str())
                    })
            })
    }

    /// URL of a freshly created child, plus its archive root when the name
    /// is an archive.
    fn created_urls(&self, parent: &str, name: &str) -> Vec<VfsUrl> {
        match VfsUrl::parse(parent).and_then(|parent| parent.child(name)) {
            Ok(child) => self.with_archive_root(child),
            Err(e) => {
                debug!("Skipping create of {name} under {parent}: {e}");
                Vec::new()
            }
        }
    }

    fn urls_for(&self, raw: &str) -> Vec<VfsUrl> {
        match VfsUrl::parse(raw) {
            Ok(url) => self.with_archive_root(url),
            Err(e) => {
                debug!("Skipping unresolvable path: {e}");
                Vec::new()
            }
        }
    }

    fn with_archive_root(&self, url: VfsUrl) -> Vec<VfsUrl> {
        let is_archive = url.scheme() == Scheme::File && self.config.is_archive_name(url.name());
        let archive_root = if is_archive {
            url.archive_root()
        } else {
            None
        };
        let mut urls = vec![url];
        urls.extend(archive_root);
        urls
    }

    fn listener(&self) -> Option<Arc<dyn RootsListener>> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn dispatch(&self, notify: impl FnOnce(&dyn RootsListener)) {
        let Some(listener) = self.listener() else {
            return;
        };
        let Some(_token) = self.guard.enter() else {
            warn!("Dropping nested roots notification");
            return;
        };
        notify(listener.as_ref());
    }

    fn lock_state(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn record_relocations(tracking: &mut RenameTrackingTable, batch: &EventBatch) {
    for event in &batch.events {
        let (kind, is_directory) = match event {
            FsEvent::Rename { is_directory, .. } => (RelocationKind::Rename, *is_directory),
            FsEvent::Move { .. } => (RelocationKind::Move, true),
            FsEvent::Create { .. } | FsEvent::Delete { .. } | FsEvent::Copy { .. } => continue,
        };
        let Some((old, new)) = event.relocation() else {
            continue;
        };

        match (VfsUrl::parse(old), VfsUrl::parse(new)) {
            (Ok(old), Ok(new)) => {
                tracking.record(old.path(), new.path(), kind, is_directory);
            }
            _ => debug!("Not tracking relocation {old} -> {new}: unresolvable path"),
        }
    }
}

fn log_report(report: &PropagationReport) {
    debug!(
        "Rename propagation: {} consumed, {} dropped",
        report.consumed, report.dropped
    );
    for failure in &report.failures {
        warn!("Rename propagation failed for {}: {}", failure.path, failure.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, EntityRef};
    use crate::guard::ExclusivePermit;
    use crate::model::InMemoryModel;
    use crate::rename::StructuralModificationTracker;
    use pretty_assertions::assert_eq;
    use std::sync::Weak;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RootsListener for Recorder {
        fn before_changed(&self) {
            self.calls.lock().unwrap().push("before".to_string());
        }

        fn changed(&self, classification: Classification) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("changed:{classification:?}"));
        }
    }

    struct Fixture {
        watcher: Arc<RootsChangeWatcher>,
        permit: Arc<ExclusivePermit>,
        lifecycle: Arc<ModelLifecycle>,
        recorder: Arc<Recorder>,
    }

    fn fixture() -> Fixture {
        let graph = EntityGraph::from_entities([
            Entity::new("module:app", EntityKind::Module, "app")
                .with_root("content_root", "/proj/a")
                .with_root("content_root", "/proj/b")
                .with_root("output_root", "/proj/out"),
            Entity::new("library:lib", EntityKind::Library, "lib")
                .with_root("class_root", "/proj/lib.jar!/"),
        ]);
        let paths = Arc::new(PathTable::new());
        let permit = Arc::new(ExclusivePermit::new());
        let lifecycle = Arc::new(ModelLifecycle::ready());
        let watcher = RootsChangeWatcher::new(
            Collaborators {
                model: Arc::new(InMemoryModel::new(graph, paths.clone())),
                paths,
                permit: permit.clone(),
                lifecycle: lifecycle.clone(),
                dependents: Arc::new(DependentRegistry::new()),
                modifications: Arc::new(StructuralModificationTracker::new()),
            },
            WatcherConfig::default(),
        )
        .with_predicate(|_, property| property != "output_root");
        let recorder = Arc::new(Recorder::default());
        watcher.set_listener(Some(recorder.clone()));

        Fixture {
            watcher: Arc::new(watcher),
            permit,
            lifecycle,
            recorder,
        }
    }

    fn batch(events: impl IntoIterator<Item = FsEvent>) -> EventBatch {
        events.into_iter().collect()
    }

    fn run(fixture: &Fixture, batch: &EventBatch) -> Classification {
        let before = fixture.watcher.before(batch);
        let after = fixture.watcher.after(batch);
        assert_eq!(before, after);
        after
    }

    #[test]
    fn test_mixed_batch_is_generic() {
        let fx = fixture();
        let _permit = fx.permit.acquire();
        let events = batch([FsEvent::create("/proj/a"), FsEvent::delete("/proj/b")]);
        assert_eq!(run(&fx, &events), Classification::Generic);
        assert_eq!(fx.recorder.calls(), vec!["before", "changed:Generic"]);
    }

    #[test]
    fn test_archive_file_maps_to_jar_root() {
        let fx = fixture();
        let _permit = fx.permit.acquire();
        assert_eq!(
            run(&fx, &batch([FsEvent::delete("/proj/lib.jar")])),
            Classification::Removed
        );
        assert_eq!(
            run(&fx, &batch([FsEvent::create("/proj/lib.jar")])),
            Classification::Added
        );
    }

    #[test]
    fn test_predicate_filters_properties() {
        let fx = fixture();
        let _permit = fx.permit.acquire();
        assert_eq!(
            run(&fx, &batch([FsEvent::delete("/proj/out")])),
            Classification::None
        );
        assert!(fx.recorder.calls().is_empty());
    }

    #[test]
    fn test_move_of_root_is_generic() {
        let fx = fixture();
        let _permit = fx.permit.acquire();
        assert_eq!(
            run(&fx, &batch([FsEvent::moved("/proj/a", "/elsewhere/a")])),
            Classification::Generic
        );
        assert_eq!(
            run(&fx, &batch([FsEvent::rename_file("/proj/a/x.txt", "/proj/a/y.txt")])),
            Classification::None
        );
    }

    #[test]
    fn test_copy_counts_as_added() {
        let fx = fixture();
        let _permit = fx.permit.acquire();
        assert_eq!(
            run(&fx, &batch([FsEvent::copy("/tmp/a", "/proj/a")])),
            Classification::Added
        );
    }

    #[test]
    fn test_malformed_paths_are_ignored() {
        let fx = fixture();
        let _permit = fx.permit.acquire();
        let events = batch([
            FsEvent::delete("relative/path"),
            FsEvent::moved("", "/proj/../x"),
            FsEvent::create("/proj/b"),
        ]);
        assert_eq!(run(&fx, &events), Classification::Added);
    }

    #[test]
    fn test_disposed_model_suppresses() {
        let fx = fixture();
        let _permit = fx.permit.acquire();
        fx.lifecycle.dispose();
        assert_eq!(fx.watcher.suppression(), Some(Suppression::Disposed));
        assert_eq!(
            run(&fx, &batch([FsEvent::create("/proj/a")])),
            Classification::None
        );
        assert!(fx.recorder.calls().is_empty());
    }

    #[test]
    fn test_missing_listener_suppresses() {
        let fx = fixture();
        let _permit = fx.permit.acquire();
        fx.watcher.set_listener(None);
        assert_eq!(fx.watcher.suppression(), Some(Suppression::NotWired));
        assert_eq!(
            fx.watcher.before(&batch([FsEvent::create("/proj/a")])),
            Classification::None
        );
    }

    #[test]
    fn test_short_circuit_has_no_observable_effect() {
        let fx = fixture();
        let events = batch([
            FsEvent::create("/proj/a"),
            FsEvent::delete("/proj/b"),
            FsEvent::create("/proj/lib.jar"),
        ]);
        let short = fx.watcher.classify(&events);

        let graph = EntityGraph::from_entities([Entity::new("module:app", EntityKind::Module, "app")
            .with_root("content_root", "/proj/a")
            .with_root("content_root", "/proj/b")
            .with_root("output_root", "/proj/out")]);
        let paths = Arc::new(PathTable::new());
        let full = RootsChangeWatcher::new(
            Collaborators {
                model: Arc::new(InMemoryModel::new(graph, paths.clone())),
                paths,
                permit: Arc::new(ExclusivePermit::new()),
                lifecycle: Arc::new(ModelLifecycle::ready()),
                dependents: Arc::new(DependentRegistry::new()),
                modifications: Arc::new(StructuralModificationTracker::new()),
            },
            WatcherConfig::default().with_short_circuit(false),
        )
        .classify(&events);

        assert_eq!(short, Classification::Generic);
        assert_eq!(short, full);
    }

    /// Listener that feeds another batch into the watcher while it is being
    /// notified.
    struct Reentrant {
        watcher: Mutex<Weak<RootsChangeWatcher>>,
        nested: Mutex<Vec<Classification>>,
    }

    impl RootsListener for Reentrant {
        fn before_changed(&self) {
            let Some(watcher) = self.watcher.lock().unwrap().upgrade() else {
                return;
            };
            let nested = batch([
                FsEvent::delete("/proj/b"),
                FsEvent::rename_dir("/proj/x", "/proj/y"),
            ]);
            let before = watcher.before(&nested);
            let after = watcher.after(&nested);
            self.nested.lock().unwrap().extend([before, after]);
        }

        fn changed(&self, _classification: Classification) {}
    }

    #[test]
    fn test_reentrant_batch_is_suppressed() {
        let fx = fixture();
        let _permit = fx.permit.acquire();
        let listener = Arc::new(Reentrant {
            watcher: Mutex::new(Arc::downgrade(&fx.watcher)),
            nested: Mutex::new(Vec::new()),
        });
        fx.watcher.set_listener(Some(listener.clone()));

        let outer = batch([FsEvent::create("/proj/a")]);
        assert_eq!(fx.watcher.before(&outer), Classification::Added);
        assert_eq!(
            *listener.nested.lock().unwrap(),
            vec![Classification::None, Classification::None]
        );
        // the nested rename was still tracked, and the outer batch kept its
        // classification through the nested one
        assert_eq!(fx.watcher.pending_relocations(), 1);
        assert_eq!(fx.watcher.after(&outer), Classification::Added);
        assert_eq!(fx.watcher.pending_relocations(), 0);
    }

    #[test]
    fn test_archive_mount_owner_resolved() {
        let fx = fixture();
        let (_, index) = fx.watcher.model.snapshot();
        let inner = VfsUrl::parse("/proj/lib.jar!/org/A.class").unwrap();
        let refs: Vec<EntityRef> = index
            .affected(&fx.watcher.paths, &inner)
            .refs
            .into_iter()
            .collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].property, "class_root");
    }
}
