//! Access to the current entity graph and its derived index.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::entity::{Commit, EntityGraph};
use crate::error::Result;
use crate::index::EntityIndex;
use crate::path::PathTable;

/// Read/commit access to the entity graph.
///
/// Implementations hand out immutable snapshots; a commit replaces the
/// snapshot wholesale and never mutates one a reader may still hold.
pub trait EntityModel: Send + Sync {
    /// Current snapshot.
    fn current(&self) -> Arc<EntityGraph>;

    /// Index derived from the current snapshot.
    fn index(&self) -> Arc<EntityIndex>;

    /// Graph and index as one consistent pair.
    fn snapshot(&self) -> (Arc<EntityGraph>, Arc<EntityIndex>) {
        (self.current(), self.index())
    }

    /// Apply `commit`, returning the new snapshot.
    fn commit(&self, commit: Commit) -> Result<Arc<EntityGraph>>;
}

#[derive(Debug)]
struct Snapshot {
    graph: Arc<EntityGraph>,
    index: Arc<EntityIndex>,
}

/// Copy-on-write in-memory [`EntityModel`].
///
/// The index is rebuilt alongside every committed snapshot, so a reader that
/// fetched both under one version always sees them consistent.
#[derive(Debug)]
pub struct InMemoryModel {
    paths: Arc<PathTable>,
    snapshot: RwLock<Snapshot>,
}

impl InMemoryModel {
    pub fn new(graph: EntityGraph, paths: Arc<PathTable>) -> Self {
        let index = EntityIndex::build(&graph, &paths);
        Self {
            paths,
            snapshot: RwLock::new(Snapshot {
                graph: Arc::new(graph),
                index: Arc::new(index),
            }),
        }
    }

    pub fn paths(&self) -> &Arc<PathTable> {
        &self.paths
    }
}

impl EntityModel for InMemoryModel {
    fn current(&self) -> Arc<EntityGraph> {
        self.snapshot().0
    }

    fn index(&self) -> Arc<EntityIndex> {
        self.snapshot().1
    }

    fn snapshot(&self) -> (Arc<EntityGraph>, Arc<EntityIndex>) {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        (snapshot.graph.clone(), snapshot.index.clone())
    }

    fn commit(&self, commit: Commit) -> Result<Arc<EntityGraph>> {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);

        let next = match snapshot.graph.apply(&commit) {
            Ok(next) => Arc::new(next),
            Err(e) => {
                warn!("Rejected commit on version {}: {e}", snapshot.graph.version());
                return Err(e);
            }
        };

        let index = EntityIndex::build(&next, &self.paths);
        debug!(
            "Committed {} change(s), graph now at version {}",
            commit.changes.len(),
            next.version()
        );
        snapshot.graph = next.clone();
        snapshot.index = Arc::new(index);
        Ok(next)
    }
}
