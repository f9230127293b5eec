//! # Lock order auditing
//! Every lock and unlock call site asks the [Auditor] first. The auditor keeps:
//! - a registry of live locks: kind family, reentrancy, where it was first seen, who holds it how many times
//! - a path per thread: the last few lock/unlock events and what the thread holds right now
//!
//! Before a lock is taken, the request is compared with what the current holders are doing.
//! A request that would make the thread wait on itself, or close a two-thread cycle, is refused
//! with a report instead of being allowed to hang.
//!
//! The auditor never touches the locks. It only judges what call sites tell it, so a lock
//! taken behind its back is invisible to it.
//!
//! ## The gap
//! The check and the real acquisition are two steps. Another thread may change its mind right
//! after the check, so the verdict is a snapshot, not a guarantee.
//!
//! ## Cycle detection is a heuristic
//! Only the other thread's most recent event is looked at, not the full wait-for graph.
//! That keeps every check at O(holders), but cycles through 3+ threads or older history are missed.

mod config;
mod error;
mod id;
mod kind;
mod path;
mod registry;
mod report;
mod state;

use std::{cell::RefCell, sync::Arc};

use parking_lot::ReentrantMutex;

pub use config::{AuditorConfig, DEFAULT_HISTORY_CAPACITY};
pub use error::{AuditError, AuditErrorKind};
pub use id::{LockId, SourcePosition};
pub use kind::{Action, LockFamily, LockKind};
pub use path::{HoldCounts, LockPath, PathEvent};
pub use registry::LockEntry;
pub use report::{ConflictReport, LockSnapshot, ThreadSnapshot};

use crate::thread_token::ThreadId;
use state::{AuditState, Request};

/// Process-wide audit state behind one reentrant mutex.
///
/// Create one, share it with an [Arc], drop it when done. There's no global instance.
///
/// The mutex has to be reentrant: a try-lock holds it across the primitive's attempt
/// and the bookkeeping that follows, see [Auditor::try_acquire].
#[derive(Debug, Default)]
pub struct Auditor {
    config: AuditorConfig,
    state: ReentrantMutex<RefCell<AuditState>>,
}

impl Auditor {
    pub fn new(config: AuditorConfig) -> Self {
        Self {
            config,
            state: ReentrantMutex::new(RefCell::new(AuditState::default())),
        }
    }

    pub fn shared(config: AuditorConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    fn request(lock: LockId, kind: LockKind, at: SourcePosition) -> Request {
        Request {
            thread: ThreadId::current(),
            lock,
            kind,
            at,
        }
    }

    /// Runs `f` on the state. Borrows never outlive `f`, so reentering from a try-lock is fine.
    /// Paths of threads that exited meanwhile are reaped first.
    fn with_state<R>(&self, f: impl FnOnce(&mut AuditState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.reap_exited();
        f(&mut state)
    }

    /// May the calling thread take `lock` as `kind`? On `Ok` the acquisition is already booked,
    /// the caller is expected to take the lock right after.
    pub fn check_acquire(
        &self,
        lock: LockId,
        kind: LockKind,
        recursive: bool,
        at: SourcePosition,
    ) -> Result<(), AuditError> {
        if !self.config.enabled {
            return Ok(());
        }
        let req = Self::request(lock, kind, at);
        let capacity = self.config.history_capacity;
        self.with_state(|state| state.check_acquire(&req, recursive, capacity))
            .inspect_err(|e| log::warn!("{} {lock} refused ({at}): {}", kind, e.kind()))
    }

    /// May the calling thread let go of `lock`? On `Ok` the release is already booked,
    /// the caller is expected to unlock right after.
    pub fn check_release(&self, lock: LockId, kind: LockKind, at: SourcePosition) -> Result<(), AuditError> {
        if !self.config.enabled {
            return Ok(());
        }
        let req = Self::request(lock, kind, at);
        let capacity = self.config.history_capacity;
        self.with_state(|state| state.check_release(&req, capacity))
            .inspect_err(|e| log::warn!("{} unlock of {lock} refused ({at}): {}", kind, e.kind()))
    }

    /// Couples a non-blocking attempt with its bookkeeping.
    ///
    /// The auditor mutex stays locked across `attempt` so no other thread's bookkeeping can sneak
    /// in between. A kind/reentrancy mismatch is refused before `attempt` runs.
    /// Once the primitive has said yes the lock is held for real, so it gets booked even if
    /// the order check dislikes it. A try never waits and can't be part of a deadlock,
    /// the finding is only logged.
    pub fn try_acquire(
        &self,
        lock: LockId,
        kind: LockKind,
        recursive: bool,
        at: SourcePosition,
        attempt: impl FnOnce() -> bool,
    ) -> Result<bool, AuditError> {
        if !self.config.enabled {
            return Ok(attempt());
        }
        let req = Self::request(lock, kind, at);
        let capacity = self.config.history_capacity;

        let _guard = self.state.lock();
        self.with_state(|state| state.validate(&req, recursive))
            .inspect_err(|e| log::warn!("try {} {lock} refused ({at}): {}", kind, e.kind()))?;
        if !attempt() {
            return Ok(false);
        }
        self.with_state(|state| {
            if let Err(e) = state.check_acquire(&req, recursive, capacity) {
                log::warn!("try {kind} {lock} succeeded despite: {e}");
                state.record(&req, recursive, capacity);
            }
        });
        Ok(true)
    }

    /// Forgets every lock and thread, for harnesses reusing one auditor across scenarios
    pub fn reset(&self) {
        self.with_state(|state| *state = AuditState::default());
    }

    /// Drops everything known about a lock that is going away.
    /// Returns whether some thread still held it.
    pub fn forget(&self, lock: LockId) -> bool {
        self.with_state(|state| state.forget(lock))
    }

    pub fn is_registered(&self, lock: LockId) -> bool {
        self.with_state(|state| state.is_registered(lock))
    }

    pub fn registered_count(&self) -> usize {
        self.with_state(|state| state.registered_count())
    }

    /// Threads with a path: alive and seen, or exited while holding something
    pub fn tracked_thread_count(&self) -> usize {
        self.with_state(|state| state.tracked_thread_count())
    }

    pub fn holdings_of_current_thread(&self, lock: LockId) -> Option<HoldCounts> {
        self.with_state(|state| state.holding(ThreadId::current(), lock))
    }

    pub fn history_len_of_current_thread(&self) -> usize {
        self.with_state(|state| state.history_len(ThreadId::current()))
    }
}

/// Checks with the call site captured by `#[track_caller]`
impl Auditor {
    #[track_caller]
    pub fn check_lock(&self, lock: LockId) -> Result<(), AuditError> {
        self.check_acquire(lock, LockKind::Exclusive, false, SourcePosition::caller())
    }

    #[track_caller]
    pub fn check_recursive_lock(&self, lock: LockId) -> Result<(), AuditError> {
        self.check_acquire(lock, LockKind::Exclusive, true, SourcePosition::caller())
    }

    #[track_caller]
    pub fn check_unlock(&self, lock: LockId) -> Result<(), AuditError> {
        self.check_release(lock, LockKind::Exclusive, SourcePosition::caller())
    }

    #[track_caller]
    pub fn check_read_lock(&self, lock: LockId) -> Result<(), AuditError> {
        self.check_acquire(lock, LockKind::Read, false, SourcePosition::caller())
    }

    #[track_caller]
    pub fn check_recursive_read_lock(&self, lock: LockId) -> Result<(), AuditError> {
        self.check_acquire(lock, LockKind::Read, true, SourcePosition::caller())
    }

    #[track_caller]
    pub fn check_read_unlock(&self, lock: LockId) -> Result<(), AuditError> {
        self.check_release(lock, LockKind::Read, SourcePosition::caller())
    }

    #[track_caller]
    pub fn check_write_lock(&self, lock: LockId) -> Result<(), AuditError> {
        self.check_acquire(lock, LockKind::Write, false, SourcePosition::caller())
    }

    #[track_caller]
    pub fn check_recursive_write_lock(&self, lock: LockId) -> Result<(), AuditError> {
        self.check_acquire(lock, LockKind::Write, true, SourcePosition::caller())
    }

    #[track_caller]
    pub fn check_write_unlock(&self, lock: LockId) -> Result<(), AuditError> {
        self.check_release(lock, LockKind::Write, SourcePosition::caller())
    }
}
