//! Filesystem events delivered to the watcher.

use std::path::Path;

use chrono::{DateTime, Utc};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use serde::{Deserialize, Serialize};

/// A filesystem mutation.
///
/// Paths are kept as the raw strings the event source reported; they are
/// parsed into path identifiers only while a batch is processed, so a
/// malformed path just contributes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FsEvent {
    /// `name` was created under `parent`.
    Create {
        parent: String,
        name: String,
        is_directory: bool,
    },

    /// `path` was deleted.
    Delete { path: String },

    /// `path` was moved to a different parent.
    Move { old: String, new: String },

    /// `path` was renamed in place.
    Rename {
        old: String,
        new: String,
        is_directory: bool,
    },

    /// A copy of `source` was created at `target`.
    Copy { source: String, target: String },
}

impl FsEvent {
    /// Create event for a full path, split into parent and name.
    pub fn create(path: &str) -> Self {
        let trimmed = path.trim_end_matches('/');
        let (parent, name) = match trimmed.rsplit_once('/') {
            Some(("", name)) => ("/", name),
            Some((parent, name)) => (parent, name),
            None => ("", trimmed),
        };
        Self::Create {
            parent: parent.to_string(),
            name: name.to_string(),
            is_directory: false,
        }
    }

    /// Create event for a directory.
    pub fn create_dir(path: &str) -> Self {
        match Self::create(path) {
            Self::Create { parent, name, .. } => Self::Create {
                parent,
                name,
                is_directory: true,
            },
            other => other,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::Delete { path: path.into() }
    }

    pub fn moved(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self::Move {
            old: old.into(),
            new: new.into(),
        }
    }

    /// Rename of a directory.
    pub fn rename_dir(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self::Rename {
            old: old.into(),
            new: new.into(),
            is_directory: true,
        }
    }

    /// Rename of a plain file.
    pub fn rename_file(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self::Rename {
            old: old.into(),
            new: new.into(),
            is_directory: false,
        }
    }

    pub fn copy(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Copy {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Old and new path of a move or rename.
    pub fn relocation(&self) -> Option<(&str, &str)> {
        match self {
            Self::Move { old, new } | Self::Rename { old, new, .. } => {
                Some((old.as_str(), new.as_str()))
            }
            Self::Create { .. } | Self::Delete { .. } | Self::Copy { .. } => None,
        }
    }

    /// Convert a raw notify event. Kinds the watcher does not care about
    /// (access, metadata, content modification, split renames) yield `None`.
    pub fn from_notify(event: &notify::Event) -> Option<Self> {
        match (&event.kind, event.paths.as_slice()) {
            (notify::EventKind::Create(kind), [path]) => {
                let created = path_str(path);
                let is_directory = matches!(kind, CreateKind::Folder) || path.is_dir();
                if is_directory {
                    Some(Self::create_dir(&created))
                } else {
                    Some(Self::create(&created))
                }
            }
            (notify::EventKind::Remove(_), [path]) => Some(Self::delete(path_str(path))),
            (notify::EventKind::Modify(ModifyKind::Name(RenameMode::Both)), [old, new]) => {
                if old.parent() == new.parent() {
                    Some(Self::Rename {
                        old: path_str(old),
                        new: path_str(new),
                        is_directory: new.is_dir(),
                    })
                } else {
                    Some(Self::moved(path_str(old), path_str(new)))
                }
            }
            _ => None,
        }
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// An ordered batch of events.
#[derive(Debug, Clone)]
pub struct EventBatch {
    /// Events in arrival order.
    pub events: Vec<FsEvent>,

    /// When the batch was created.
    pub created_at: DateTime<Utc>,
}

impl EventBatch {
    /// Create a new empty batch.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Add an event to the batch.
    pub fn push(&mut self, event: FsEvent) {
        self.events.push(event);
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Get the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }
}

impl Default for EventBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<FsEvent> for EventBatch {
    fn from_iter<T: IntoIterator<Item = FsEvent>>(iter: T) -> Self {
        Self {
            events: iter.into_iter().collect(),
            created_at: Utc::now(),
        }
    }
}
