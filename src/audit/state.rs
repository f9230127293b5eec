//! The bookkeeping behind [super::Auditor]. Everything here runs under the auditor mutex
//! and never waits on anything.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use super::{
    Action, AuditError, ConflictReport, HoldCounts, LockEntry, LockId, LockKind, LockPath,
    LockSnapshot, PathEvent, SourcePosition, ThreadSnapshot,
};
use crate::thread_token::{ExitQueue, ThreadId};

/// One lock or unlock as reported by a call site
#[derive(Debug, Clone, Copy)]
pub(super) struct Request {
    pub thread: ThreadId,
    pub lock: LockId,
    pub kind: LockKind,
    pub at: SourcePosition,
}

impl Request {
    fn event(&self, action: Action) -> PathEvent {
        PathEvent {
            lock: self.lock,
            at: self.at,
            kind: self.kind,
            action,
        }
    }
}

enum Conflict {
    SelfDeadlock,
    Ordering(ThreadId),
}

#[derive(Debug, Default)]
pub(super) struct AuditState {
    locks: BTreeMap<LockId, LockEntry>,
    paths: BTreeMap<ThreadId, LockPath>,
    /// threads that got a path and exited since
    exited: Arc<ExitQueue>,
    /// exited, but still holding something
    lingering: BTreeSet<ThreadId>,
}

impl AuditState {
    /// Rejects a lock id reused with another kind family or reentrancy.
    /// Unknown ids pass, they'll be bound on their first recorded acquisition.
    pub fn validate(&self, req: &Request, recursive: bool) -> Result<(), AuditError> {
        match self.locks.get(&req.lock) {
            Some(entry) if !entry.matches(req.kind, recursive) => Err(AuditError::ContractMismatch {
                lock: req.lock,
                at: req.at,
            }),
            _ => Ok(()),
        }
    }

    pub fn check_acquire(&mut self, req: &Request, recursive: bool, capacity: usize) -> Result<(), AuditError> {
        self.validate(req, recursive)?;
        self.register(req, recursive);
        self.path_mut(req.thread);

        match self.find_conflict(req, recursive) {
            None => {
                self.record(req, recursive, capacity);
                Ok(())
            }
            Some(Conflict::SelfDeadlock) => {
                Err(AuditError::SelfDeadlock(self.report(req, req.thread)))
            }
            Some(Conflict::Ordering(other)) => {
                Err(AuditError::OrderingConflict(self.report(req, other)))
            }
        }
    }

    pub fn check_release(&mut self, req: &Request, capacity: usize) -> Result<(), AuditError> {
        let released = self
            .paths
            .get_mut(&req.thread)
            .is_some_and(|path| path.release(req.event(Action::Release), capacity));
        if !released {
            return Err(AuditError::InvalidUnlock {
                lock: req.lock,
                at: req.at,
            });
        }
        log::trace!("thread {} released {} {} ({})", req.thread, req.kind, req.lock, req.at);

        let entry = self.entry_mut(req.lock);
        entry.release(req.kind, req.thread);
        if entry.is_idle() {
            self.locks.remove(&req.lock);
            log::debug!("{} has no holders left, unregistered", req.lock);
        }
        Ok(())
    }

    /// Books an acquisition without looking for conflicts
    pub fn record(&mut self, req: &Request, recursive: bool, capacity: usize) {
        self.register(req, recursive);
        self.path_mut(req.thread)
            .acquire(req.event(Action::Acquire), capacity);
        self.entry_mut(req.lock).acquire(req.kind, req.thread);
        log::trace!("thread {} acquired {} {} ({})", req.thread, req.kind, req.lock, req.at);
    }

    /// The thread asking is the one the path belongs to, so it's the one to watch
    fn path_mut(&mut self, thread: ThreadId) -> &mut LockPath {
        let exited = &self.exited;
        self.paths.entry(thread).or_insert_with(|| {
            exited.watch_current_thread();
            LockPath::default()
        })
    }

    /// Drops the paths of exited threads that hold nothing.
    /// A thread that exited holding locks keeps its path until those locks are forgotten.
    pub fn reap_exited(&mut self) {
        for thread in self.exited.drain() {
            if let Some(path) = self.paths.get(&thread).filter(|p| !p.holdings().is_empty()) {
                log::debug!(
                    "thread {thread} exited holding {} locks, path kept",
                    path.holdings().len()
                );
            }
            self.lingering.insert(thread);
        }
        let paths = &mut self.paths;
        self.lingering.retain(|thread| {
            let holding = paths.get(thread).map(|path| !path.holdings().is_empty());
            match holding {
                Some(true) => true,
                Some(false) => {
                    paths.remove(thread);
                    log::trace!("thread {thread} exited, path dropped");
                    false
                }
                None => false,
            }
        });
    }

    /// Forgets a lock that's gone, wherever it's still held.
    /// Returns whether anything remembered it.
    pub fn forget(&mut self, lock: LockId) -> bool {
        let mut held = self.locks.remove(&lock).is_some();
        for path in self.paths.values_mut() {
            held |= path.forget(lock);
        }
        held
    }

    fn register(&mut self, req: &Request, recursive: bool) {
        self.locks.entry(req.lock).or_insert_with(|| {
            log::debug!(
                "registered {} as {}{} ({})",
                req.lock,
                if recursive { "recursive " } else { "" },
                req.kind.family(),
                req.at
            );
            LockEntry::new(req.lock, req.kind.family(), recursive, req.at)
        });
    }

    fn entry_mut(&mut self, lock: LockId) -> &mut LockEntry {
        match self.locks.get_mut(&lock) {
            Some(entry) => entry,
            None => unreachable!("{lock} is held but not registered"),
        }
    }

    fn find_conflict(&self, req: &Request, recursive: bool) -> Option<Conflict> {
        let mine = self.paths.get(&req.thread)?;
        // holding nothing => can't wait on itself, can't close a cycle
        if mine.holdings().is_empty() {
            return None;
        }
        let entry = self.locks.get(&req.lock)?;
        for holder in entry.competitors(req.kind) {
            if holder == req.thread {
                let Some(held) = mine.holding(req.lock) else {
                    continue;
                };
                // another read on top of our own read or write never waits
                if req.kind == LockKind::Read {
                    continue;
                }
                // a recursive lock re-enters fine, unless it's a read being upgraded to a write
                if !recursive || (req.kind == LockKind::Write && held.write == 0) {
                    return Some(Conflict::SelfDeadlock);
                }
            } else if self
                .paths
                .get(&holder)
                .is_some_and(|theirs| crosses(mine, req, theirs))
            {
                return Some(Conflict::Ordering(holder));
            }
        }
        None
    }

    fn report(&self, req: &Request, other: ThreadId) -> Box<ConflictReport> {
        let snapshot = |thread: ThreadId| match self.paths.get(&thread) {
            Some(path) => ThreadSnapshot::capture(thread, path),
            None => ThreadSnapshot::capture(thread, &LockPath::default()),
        };
        Box::new(ConflictReport {
            requester: req.thread,
            lock: req.lock,
            kind: req.kind,
            at: req.at,
            threads: [snapshot(req.thread), snapshot(other)],
            locks: self.locks.values().map(LockSnapshot::from).collect(),
        })
    }

    pub fn is_registered(&self, lock: LockId) -> bool {
        self.locks.contains_key(&lock)
    }

    pub fn registered_count(&self) -> usize {
        self.locks.len()
    }

    pub fn tracked_thread_count(&self) -> usize {
        self.paths.len()
    }

    pub fn holding(&self, thread: ThreadId, lock: LockId) -> Option<HoldCounts> {
        self.paths.get(&thread)?.holding(lock).copied()
    }

    pub fn history_len(&self, thread: ThreadId) -> usize {
        self.paths.get(&thread).map_or(0, |path| path.history().count())
    }
}

/// Two-thread lock order inversion, judged from the other thread's most recent event only.
///
/// We hold X and want `req.lock`. The other thread holds `req.lock` and touched X last,
/// so it is most likely waiting for X while sitting on what we want.
/// This is not a walk over the whole wait-for graph. Longer cycles and older history go unnoticed.
fn crosses(mine: &LockPath, req: &Request, theirs: &LockPath) -> bool {
    if theirs.holdings().len() < 2 || mine.holdings().is_empty() {
        return false;
    }
    let Some(last) = theirs.last() else {
        return false;
    };
    // plain contention on the very lock we want, the primitive sorts that out
    if last.lock == req.lock {
        return false;
    }
    let Some(their_hold) = theirs.holding(req.lock) else {
        return false;
    };
    let Some(my_hold) = mine.holding(last.lock) else {
        return false;
    };
    // readers all the way, nobody would wait
    let readers_only = req.kind == LockKind::Read
        && my_hold.write == 0
        && their_hold.write == 0
        && last.kind != LockKind::Write;
    !readers_only
}
