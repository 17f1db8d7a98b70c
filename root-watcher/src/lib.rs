//! # Root Watcher
//!
//! This crate detects when filesystem changes touch the roots of a project
//! model (content roots, source roots, library class roots, archive mounts)
//! and notifies subscribers once per batch, before and after the change.
//!
//! ## Features
//!
//! - **Path Interning**: Scheme-qualified path identifiers with sub-tree navigation
//! - **Entity Index**: Path → entity lookups, including archive containment
//! - **Classification**: `None` / `Added` / `Removed` / `Generic` per batch
//! - **Two-Phase Notification**: `before_changed` then `changed`, exactly once
//! - **Rename Propagation**: Keeps stored descriptor paths and entity names in sync
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Root Watcher                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  FsEventSource ──► EventBatch ──► RootsChangeWatcher            │
//! │                                     │          │                │
//! │                                     ▼          ▼                │
//! │                 EntityIndex ◄── EntityModel   RenamePropagator  │
//! │                      │                         │                │
//! │                      ▼                         ▼                │
//! │                  PathTable              DependentRegistry       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod classification;
pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod guard;
pub mod index;
pub mod listener;
pub mod model;
pub mod path;
pub mod processor;
pub mod rename;
pub mod source;
pub mod tracking;

pub use classification::Classification;
pub use config::WatcherConfig;
pub use entity::{
    Commit, Entity, EntityGraph, EntityId, EntityKind, EntityRef, GraphChange, RootRef,
};
pub use error::{Result, RootsError};
pub use event::{EventBatch, FsEvent};
pub use guard::{DispatchGuard, ExclusivePermit, ModelLifecycle, MutationPermit, Suppression};
pub use index::{Affected, EntityIndex};
pub use listener::RootsListener;
pub use model::{EntityModel, InMemoryModel};
pub use path::{PathId, PathTable, Scheme, VfsUrl};
pub use processor::{AffectsRoots, Collaborators, RootsChangeWatcher};
pub use rename::{
    DependentPath, DependentRegistry, ModificationCounter, PropagationReport, RenamePropagator,
    StructuralModificationTracker,
};
pub use source::{FsEventSource, pump_batches};
pub use tracking::RenameTrackingTable;
