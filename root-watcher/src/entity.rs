//! Entities and the immutable entity graph.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RootsError};

/// Stable identifier of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of structural entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Module,
    Library,
    Sdk,
    Facet,
}

/// A path referenced by an entity through one of its properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRef {
    /// Property holding the path, e.g. `content_root` or `class_root`.
    pub property: String,

    /// Path or URL of the root.
    pub url: String,

    /// Whether the root is an archive-mount directory whose descendants are
    /// not indexed individually.
    #[serde(default)]
    pub archive_mount: bool,
}

/// A structural object referencing paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,

    /// Logical name; modules derive it from their descriptor file.
    pub name: String,

    pub roots: Vec<RootRef>,
}

impl Entity {
    pub fn new(id: impl Into<String>, kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(id),
            kind,
            name: name.into(),
            roots: Vec::new(),
        }
    }

    /// Add a root under `property`.
    pub fn with_root(mut self, property: impl Into<String>, url: impl Into<String>) -> Self {
        self.roots.push(RootRef {
            property: property.into(),
            url: url.into(),
            archive_mount: false,
        });
        self
    }

    /// Add an archive-mount root under `property`.
    pub fn with_archive_mount(
        mut self,
        property: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        self.roots.push(RootRef {
            property: property.into(),
            url: url.into(),
            archive_mount: true,
        });
        self
    }
}

/// An (entity, property) pair affected by a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub entity: EntityId,
    pub property: String,
}

/// A single change requested of the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphChange {
    /// Add a new entity.
    Add(Entity),

    /// Remove an entity.
    Remove(EntityId),

    /// Change an entity's logical name; `from` must match the current name.
    Rename {
        id: EntityId,
        from: String,
        to: String,
    },

    /// Replace an entity's roots.
    SetRoots { id: EntityId, roots: Vec<RootRef> },
}

/// A set of changes applied atomically on top of `base_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub base_version: u64,
    pub changes: Vec<GraphChange>,
}

impl Commit {
    pub fn new(base_version: u64) -> Self {
        Self {
            base_version,
            changes: Vec::new(),
        }
    }

    pub fn with(mut self, change: GraphChange) -> Self {
        self.changes.push(change);
        self
    }
}

/// Immutable snapshot of all entities.
///
/// Applying a commit never touches an existing snapshot; it returns a new
/// one with the version bumped.
#[derive(Debug, Clone, Default)]
pub struct EntityGraph {
    version: u64,
    entities: BTreeMap<EntityId, Arc<Entity>>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        Self {
            version: 0,
            entities: entities
                .into_iter()
                .map(|entity| (entity.id.clone(), Arc::new(entity)))
                .collect(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Arc<Entity>> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Produce the snapshot that results from applying `commit`.
    pub fn apply(&self, commit: &Commit) -> Result<EntityGraph> {
        if commit.base_version != self.version {
            return Err(RootsError::CommitRejected(format!(
                "stale base version {} (current {})",
                commit.base_version, self.version
            )));
        }

        let mut entities = self.entities.clone();
        for change in &commit.changes {
            match change {
                GraphChange::Add(entity) => {
                    if entities.contains_key(&entity.id) {
                        return Err(RootsError::CommitRejected(format!(
                            "entity {} already exists",
                            entity.id
                        )));
                    }
                    entities.insert(entity.id.clone(), Arc::new(entity.clone()));
                }
                GraphChange::Remove(id) => {
                    entities
                        .remove(id)
                        .ok_or_else(|| RootsError::UnknownEntity(id.to_string()))?;
                }
                GraphChange::Rename { id, from, to } => {
                    let current = entities
                        .get(id)
                        .ok_or_else(|| RootsError::UnknownEntity(id.to_string()))?;
                    if current.name != *from {
                        return Err(RootsError::CommitRejected(format!(
                            "entity {id} is named `{}`, expected `{from}`",
                            current.name
                        )));
                    }
                    let mut renamed = Entity::clone(current);
                    renamed.name = to.clone();
                    entities.insert(id.clone(), Arc::new(renamed));
                }
                GraphChange::SetRoots { id, roots } => {
                    let current = entities
                        .get(id)
                        .ok_or_else(|| RootsError::UnknownEntity(id.to_string()))?;
                    let mut updated = Entity::clone(current);
                    updated.roots = roots.clone();
                    entities.insert(id.clone(), Arc::new(updated));
                }
            }
        }

        Ok(EntityGraph {
            version: self.version + 1,
            entities,
        })
    }
}
