//! Preconditions checked before a batch is classified.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, ThreadId};

/// Dispatch state of the watcher's notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Dispatching,
}

const IDLE: u8 = 0;
const DISPATCHING: u8 = 1;

/// `Idle` ⇄ `Dispatching` state machine guarding against reentrant
/// notification dispatch.
#[derive(Debug, Default)]
pub struct DispatchGuard {
    state: AtomicU8,
}

impl DispatchGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DispatchState {
        match self.state.load(Ordering::Acquire) {
            DISPATCHING => DispatchState::Dispatching,
            _ => DispatchState::Idle,
        }
    }

    pub fn is_dispatching(&self) -> bool {
        self.state() == DispatchState::Dispatching
    }

    /// Move to `Dispatching`. Returns `None` if a dispatch is already running.
    /// The returned token moves back to `Idle` when dropped.
    pub fn enter(&self) -> Option<DispatchToken<'_>> {
        self.state
            .compare_exchange(IDLE, DISPATCHING, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DispatchToken { guard: self })
    }
}

/// Proof of an ongoing dispatch.
#[derive(Debug)]
pub struct DispatchToken<'a> {
    guard: &'a DispatchGuard,
}

impl Drop for DispatchToken<'_> {
    fn drop(&mut self) {
        self.guard.state.store(IDLE, Ordering::Release);
    }
}

/// Lifecycle of the model owning the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Loading,
    Ready,
    Disposed,
}

/// Atomic lifecycle cell.
///
/// Writes use release ordering and reads acquire ordering, so anything the
/// owner set up before `mark_ready` is visible to a reader that sees `Ready`.
#[derive(Debug, Default)]
pub struct ModelLifecycle {
    state: AtomicU8,
}

const LOADING: u8 = 0;
const READY: u8 = 1;
const DISPOSED: u8 = 2;

impl ModelLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Already-ready lifecycle.
    pub fn ready() -> Self {
        Self {
            state: AtomicU8::new(READY),
        }
    }

    pub fn state(&self) -> LifecycleState {
        match self.state.load(Ordering::Acquire) {
            LOADING => LifecycleState::Loading,
            READY => LifecycleState::Ready,
            _ => LifecycleState::Disposed,
        }
    }

    /// `Loading` → `Ready`. A disposed model stays disposed.
    pub fn mark_ready(&self) -> bool {
        self.state
            .compare_exchange(LOADING, READY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn dispose(&self) {
        self.state.store(DISPOSED, Ordering::Release);
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == LifecycleState::Disposed
    }
}

/// Check for the exclusive mutation permit of the surrounding model.
pub trait MutationPermit: Send + Sync {
    /// Whether the calling thread currently holds exclusive mutation access.
    fn is_held(&self) -> bool;
}

/// Single-writer permit owned by at most one thread at a time.
#[derive(Debug, Default)]
pub struct ExclusivePermit {
    owner: Mutex<Option<ThreadId>>,
}

impl ExclusivePermit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the permit for the current thread. Returns `None` if another
    /// thread (or this one) already holds it.
    pub fn acquire(&self) -> Option<PermitGuard<'_>> {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if owner.is_some() {
            return None;
        }
        *owner = Some(thread::current().id());
        Some(PermitGuard { permit: self })
    }
}

impl MutationPermit for ExclusivePermit {
    fn is_held(&self) -> bool {
        let owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        *owner == Some(thread::current().id())
    }
}

/// Held permit; released on drop.
#[derive(Debug)]
pub struct PermitGuard<'a> {
    permit: &'a ExclusivePermit,
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        let mut owner = self
            .permit
            .owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *owner = None;
    }
}

/// Why a batch was not classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    /// The caller does not hold the mutation permit.
    NoPermit,

    /// The owning model has been disposed.
    Disposed,

    /// No classifying listener is installed.
    NotWired,

    /// A notification from this watcher is being dispatched.
    Reentrant,
}
