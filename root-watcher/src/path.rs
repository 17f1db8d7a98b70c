//! Path identifiers.
//!
//! Every path the watcher reasons about is a [`VfsUrl`]: a scheme (`file` or
//! `jar`) plus a normalized absolute path. Entries of a mounted archive are
//! addressed below its archive root, e.g. `jar:///proj/lib.jar!/com/Foo.class`.
//!
//! [`PathTable`] interns URLs into cheap [`PathId`] handles and keeps the
//! parent/child links between the identifiers it has seen.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, RootsError};

/// Separator between an archive file and the path inside it.
pub const ARCHIVE_SEPARATOR: &str = "!/";

/// Addressing scheme of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// Plain local filesystem.
    File,

    /// Namespace of a mounted archive.
    Jar,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Jar => "jar",
        }
    }
}

/// A normalized, scheme-qualified path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VfsUrl {
    scheme: Scheme,
    path: String,
}

impl VfsUrl {
    /// Parse either a full URL (`file:///a/b`, `jar:///a/x.jar!/c`) or a bare
    /// absolute path. Bare paths containing `!/` land in the `jar` scheme.
    pub fn parse(raw: &str) -> Result<Self> {
        let (scheme, rest) = match raw.split_once("://") {
            Some(("file", rest)) => (Some(Scheme::File), rest),
            Some(("jar", rest)) => (Some(Scheme::Jar), rest),
            Some((other, _)) => {
                return Err(RootsError::InvalidPath(format!(
                    "unsupported scheme `{other}` in {raw}"
                )));
            }
            None => (None, raw),
        };

        let path = normalize(rest).ok_or_else(|| RootsError::InvalidPath(raw.to_string()))?;
        let archived = path.contains(ARCHIVE_SEPARATOR);
        let scheme = scheme.unwrap_or(if archived { Scheme::Jar } else { Scheme::File });

        if scheme == Scheme::Jar && !archived {
            return Err(RootsError::InvalidPath(format!(
                "jar url without archive separator: {raw}"
            )));
        }

        Ok(Self { scheme, path })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The normalized path without the scheme.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this is the root of an archive namespace (`…!/`).
    pub fn is_archive_root(&self) -> bool {
        self.scheme == Scheme::Jar && self.path.ends_with(ARCHIVE_SEPARATOR)
    }

    /// Last path segment. For an archive root this is the archive file name.
    pub fn name(&self) -> &str {
        let trimmed = self
            .path
            .strip_suffix(ARCHIVE_SEPARATOR)
            .unwrap_or(&self.path);
        trimmed.rsplit('/').next().unwrap_or_default()
    }

    /// Parent identifier. The file root `/` and archive roots have none.
    pub fn parent(&self) -> Option<VfsUrl> {
        if self.is_archive_root() || self.path == "/" {
            return None;
        }

        let idx = self.path.rfind('/')?;
        let parent = if self.scheme == Scheme::Jar && self.path[..=idx].ends_with(ARCHIVE_SEPARATOR)
        {
            self.path[..=idx].to_string()
        } else if idx == 0 {
            "/".to_string()
        } else {
            self.path[..idx].to_string()
        };

        Some(Self {
            scheme: self.scheme,
            path: parent,
        })
    }

    /// Child identifier named `name`.
    pub fn child(&self, name: &str) -> Result<VfsUrl> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(RootsError::InvalidPath(format!(
                "invalid child name `{name}` under {self}"
            )));
        }

        let path = if self.path.ends_with('/') {
            format!("{}{name}", self.path)
        } else {
            format!("{}/{name}", self.path)
        };

        Ok(Self {
            scheme: self.scheme,
            path,
        })
    }

    /// The archive root mounted for this file (`/a/x.jar` → `jar:///a/x.jar!/`).
    pub fn archive_root(&self) -> Option<VfsUrl> {
        if self.scheme != Scheme::File || self.path == "/" {
            return None;
        }
        Some(Self {
            scheme: Scheme::Jar,
            path: format!("{}{ARCHIVE_SEPARATOR}", self.path),
        })
    }

    /// The archive file hosting a `jar` URL (`jar:///a/x.jar!/c` → `file:///a/x.jar`).
    pub fn archive_file(&self) -> Option<VfsUrl> {
        if self.scheme != Scheme::Jar {
            return None;
        }
        let (file, _) = self.path.split_once(ARCHIVE_SEPARATOR)?;
        Some(Self {
            scheme: Scheme::File,
            path: file.to_string(),
        })
    }

    /// Next step up the containment chain: the parent, or for an archive
    /// root the archive file hosting it.
    pub fn container(&self) -> Option<VfsUrl> {
        match self.parent() {
            Some(parent) => Some(parent),
            None if self.is_archive_root() => self.archive_file(),
            None => None,
        }
    }
}

impl fmt::Display for VfsUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.path)
    }
}

/// Normalize an absolute path. Returns `None` for relative, empty or
/// parent-escaping paths.
fn normalize(raw: &str) -> Option<String> {
    if !raw.starts_with('/') {
        return None;
    }

    let (outer, inner) = match raw.split_once(ARCHIVE_SEPARATOR) {
        Some((outer, inner)) => (outer, Some(inner)),
        None => (raw, None),
    };

    let outer = join_segments(outer)?;
    match inner {
        None => Some(outer),
        Some(_) if outer == "/" => None,
        Some(inner) => {
            let inner = join_segments(inner)?;
            Some(format!("{outer}!{inner}"))
        }
    }
}

fn join_segments(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            seg => {
                out.push('/');
                out.push_str(seg);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Some(out)
}

/// Whether `ancestor` is a proper ancestor of `path` (plain path strings,
/// segment-aligned).
pub fn is_strict_ancestor(ancestor: &str, path: &str) -> bool {
    if path.len() <= ancestor.len() || !path.starts_with(ancestor) {
        return false;
    }
    ancestor.ends_with('/') || path[ancestor.len()..].starts_with('/')
}

/// Interned handle for a [`VfsUrl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(usize);

#[derive(Debug)]
struct PathNode {
    url: VfsUrl,
    parent: Option<PathId>,
    children: BTreeSet<PathId>,
}

#[derive(Debug, Default)]
struct Table {
    nodes: Vec<PathNode>,
    by_url: HashMap<VfsUrl, PathId>,
}

impl Table {
    fn intern(&mut self, url: &VfsUrl) -> PathId {
        if let Some(id) = self.by_url.get(url) {
            return *id;
        }

        let parent = url.container().map(|parent| self.intern(&parent));
        let id = PathId(self.nodes.len());
        self.nodes.push(PathNode {
            url: url.clone(),
            parent,
            children: BTreeSet::new(),
        });
        if let Some(node) = parent.and_then(|p| self.nodes.get_mut(p.0)) {
            node.children.insert(id);
        }
        self.by_url.insert(url.clone(), id);
        id
    }

    fn node(&self, id: PathId) -> Option<&PathNode> {
        self.nodes.get(id.0)
    }
}

/// Interning table of every path identifier observed so far.
///
/// Structurally equal URLs always map to the same [`PathId`]. Interning a path
/// interns its ancestors too, but descendants are only ever known once they
/// have been interned themselves. An archive root is linked below the archive
/// file hosting it, so sub-trees span into mounted archives.
#[derive(Debug, Default)]
pub struct PathTable {
    inner: RwLock<Table>,
}

impl PathTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a URL (and its ancestors).
    pub fn intern(&self, url: &VfsUrl) -> PathId {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .intern(url)
    }

    /// Parse and intern a path or URL string.
    pub fn intern_str(&self, raw: &str) -> Result<PathId> {
        Ok(self.intern(&VfsUrl::parse(raw)?))
    }

    /// Look up an already-interned URL.
    pub fn find(&self, url: &VfsUrl) -> Option<PathId> {
        self.read().by_url.get(url).copied()
    }

    pub fn url(&self, id: PathId) -> Option<VfsUrl> {
        self.read().node(id).map(|node| node.url.clone())
    }

    pub fn parent(&self, id: PathId) -> Option<PathId> {
        self.read().node(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: PathId) -> Vec<PathId> {
        self.read()
            .node(id)
            .map(|node| node.children.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All known descendants of `id`, excluding `id` itself.
    pub fn subtree(&self, id: PathId) -> Vec<PathId> {
        let table = self.read();
        let mut out = Vec::new();
        let mut stack: Vec<PathId> = table
            .node(id)
            .map(|node| node.children.iter().copied().collect())
            .unwrap_or_default();

        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(node) = table.node(next) {
                stack.extend(node.children.iter().copied());
            }
        }
        out
    }

    /// Proper ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: PathId) -> Vec<PathId> {
        let table = self.read();
        let mut out = Vec::new();
        let mut current = table.node(id).and_then(|node| node.parent);
        while let Some(parent) = current {
            out.push(parent);
            current = table.node(parent).and_then(|node| node.parent);
        }
        out
    }

    /// Number of interned identifiers.
    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Intern every entry found under `root` on disk.
    pub fn observe_dir(&self, root: &Path) -> Result<usize> {
        let mut observed = 0;
        for entry in WalkDir::new(root).into_iter().filter_map(std::result::Result::ok) {
            let raw = entry.path().to_string_lossy();
            match VfsUrl::parse(&raw) {
                Ok(url) => {
                    self.intern(&url);
                    observed += 1;
                }
                Err(e) => debug!("Skipping unobservable path {raw}: {e}"),
            }
        }
        debug!("Observed {observed} paths under {}", root.display());
        Ok(observed)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Table> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}
