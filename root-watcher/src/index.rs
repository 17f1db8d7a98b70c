//! Inverse index from paths to the entities referencing them.
//!
//! Entries inside an archive namespace are never indexed one by one; only
//! the archive-mount directory is. Whether a path belongs to such a mount is
//! therefore decided by walking its containment chain upward.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::warn;

use crate::entity::{EntityGraph, EntityRef};
use crate::path::{PathId, PathTable, VfsUrl};

/// Entities affected by a changed path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Affected {
    /// Union of direct, sub-tree and archive-mount references.
    pub refs: BTreeSet<EntityRef>,

    /// Mount owning the path, when it lies inside one.
    pub archive_mount: Option<PathId>,
}

impl Affected {
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// Path → entity references, derived from one [`EntityGraph`] snapshot.
#[derive(Debug, Clone, Default)]
pub struct EntityIndex {
    version: u64,
    by_path: HashMap<PathId, Vec<EntityRef>>,
    archive_mounts: HashSet<PathId>,
}

impl EntityIndex {
    /// Index every root of every entity in `graph`, interning the root paths.
    ///
    /// Archive roots (`…!/`) and roots flagged as archive mounts make up the
    /// archive-mount set.
    pub fn build(graph: &EntityGraph, paths: &PathTable) -> Self {
        let mut by_path: HashMap<PathId, Vec<EntityRef>> = HashMap::new();
        let mut archive_mounts = HashSet::new();

        for entity in graph.entities() {
            for root in &entity.roots {
                let url = match VfsUrl::parse(&root.url) {
                    Ok(url) => url,
                    Err(e) => {
                        warn!("Entity {} has an unusable {} root: {e}", entity.id, root.property);
                        continue;
                    }
                };

                let id = paths.intern(&url);
                let reference = EntityRef {
                    entity: entity.id.clone(),
                    property: root.property.clone(),
                };
                let refs = by_path.entry(id).or_default();
                if !refs.contains(&reference) {
                    refs.push(reference);
                }

                if root.archive_mount || url.is_archive_root() {
                    archive_mounts.insert(id);
                }
            }
        }

        Self {
            version: graph.version(),
            by_path,
            archive_mounts,
        }
    }

    /// Version of the snapshot this index was built from.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// References indexed exactly at `id`.
    pub fn lookup(&self, id: PathId) -> &[EntityRef] {
        self.by_path.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_archive_mount(&self, id: PathId) -> bool {
        self.archive_mounts.contains(&id)
    }

    pub fn archive_mounts(&self) -> impl Iterator<Item = PathId> + '_ {
        self.archive_mounts.iter().copied()
    }

    /// Nearest archive mount that is a proper container of `url`.
    ///
    /// Walks parents, stepping from an archive root out to the archive file
    /// hosting it, until a mount is found or the chain runs out. Unknown
    /// ancestors are skipped.
    pub fn containing_mount(&self, paths: &PathTable, url: &VfsUrl) -> Option<PathId> {
        let mut cursor = url.container();
        while let Some(candidate) = cursor {
            if let Some(id) = paths.find(&candidate) {
                if self.archive_mounts.contains(&id) {
                    return Some(id);
                }
            }
            cursor = candidate.container();
        }
        None
    }

    /// Everything affected by a change at `url`: references at the path
    /// itself, at any known descendant, and at the archive mount containing
    /// it.
    pub fn affected(&self, paths: &PathTable, url: &VfsUrl) -> Affected {
        let mut refs = BTreeSet::new();

        if let Some(id) = paths.find(url) {
            refs.extend(self.lookup(id).iter().cloned());
            for descendant in paths.subtree(id) {
                refs.extend(self.lookup(descendant).iter().cloned());
            }
        }

        let archive_mount = self.containing_mount(paths, url);
        if let Some(mount) = archive_mount {
            refs.extend(self.lookup(mount).iter().cloned());
        }

        Affected {
            refs,
            archive_mount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, EntityId, EntityKind};
    use pretty_assertions::assert_eq;

    fn url(raw: &str) -> VfsUrl {
        VfsUrl::parse(raw).unwrap()
    }

    fn reference(entity: &str, property: &str) -> EntityRef {
        EntityRef {
            entity: EntityId::new(entity),
            property: property.to_string(),
        }
    }

    fn fixture() -> (EntityGraph, PathTable, EntityIndex) {
        let graph = EntityGraph::from_entities([
            Entity::new("module:app", EntityKind::Module, "app")
                .with_root("content_root", "/proj/app")
                .with_root("source_root", "/proj/app/src"),
            Entity::new("library:guava", EntityKind::Library, "guava")
                .with_root("class_root", "/proj/lib/guava.jar!/"),
            Entity::new("library:deps", EntityKind::Library, "deps")
                .with_archive_mount("class_root", "/proj/deps"),
        ]);
        let paths = PathTable::new();
        let index = EntityIndex::build(&graph, &paths);
        (graph, paths, index)
    }

    #[test]
    fn test_direct_lookup() {
        let (_, paths, index) = fixture();
        let affected = index.affected(&paths, &url("/proj/app/src"));
        assert_eq!(
            affected.refs,
            BTreeSet::from([reference("module:app", "source_root")])
        );
        assert_eq!(affected.archive_mount, None);
    }

    #[test]
    fn test_subtree_lookup() {
        let (_, paths, index) = fixture();
        let affected = index.affected(&paths, &url("/proj"));
        assert_eq!(affected.refs.len(), 4);
    }

    #[test]
    fn test_untracked_path_is_noop() {
        let (_, paths, index) = fixture();
        assert!(index.affected(&paths, &url("/proj/app/src/Main.java")).is_empty());
        assert!(index.affected(&paths, &url("/elsewhere")).is_empty());
    }

    #[test]
    fn test_archive_containment() {
        let (_, paths, index) = fixture();
        let mount = paths.find(&url("/proj/deps")).unwrap();
        assert!(index.is_archive_mount(mount));

        // never interned, resolved through its container chain
        let affected = index.affected(&paths, &url("/proj/deps/sub/commons.jar"));
        assert_eq!(affected.archive_mount, Some(mount));
        assert_eq!(
            affected.refs,
            BTreeSet::from([reference("library:deps", "class_root")])
        );

        // entries inside a jar hosted in the mount directory
        let inner = url("jar:///proj/deps/commons.jar!/org/A.class");
        assert_eq!(index.containing_mount(&paths, &inner), Some(mount));
    }

    #[test]
    fn test_jar_root_is_mount() {
        let (_, paths, index) = fixture();
        let affected = index.affected(&paths, &url("/proj/lib/guava.jar!/com/google/Foo.class"));
        assert_eq!(
            affected.refs,
            BTreeSet::from([reference("library:guava", "class_root")])
        );
        // the mount itself is found directly, not by containment
        let direct = index.affected(&paths, &url("/proj/lib/guava.jar!/"));
        assert_eq!(direct.archive_mount, None);
        assert_eq!(direct.refs.len(), 1);
    }
}
