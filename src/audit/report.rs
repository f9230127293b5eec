//! Post-mortem dumps attached to refused acquisitions.
//!
//! A report is captured while the auditor mutex is held, so it's a consistent picture of the
//! moment the request was refused. Formatting is left to [fmt::Display].

use std::fmt;

use super::{HoldCounts, LockEntry, LockFamily, LockId, LockKind, LockPath, PathEvent, SourcePosition};
use crate::thread_token::ThreadId;

#[derive(Debug, Clone)]
pub struct ThreadSnapshot {
    pub thread: ThreadId,
    /// most recent first
    pub history: Vec<PathEvent>,
    pub holdings: Vec<(LockId, HoldCounts)>,
}

impl ThreadSnapshot {
    pub(super) fn capture(thread: ThreadId, path: &LockPath) -> Self {
        Self {
            thread,
            history: path.history().rev().copied().collect(),
            holdings: path.holdings().iter().map(|(&id, &c)| (id, c)).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockSnapshot {
    pub id: LockId,
    pub family: LockFamily,
    pub recursive: bool,
    pub first_seen: SourcePosition,
}

impl From<&LockEntry> for LockSnapshot {
    fn from(entry: &LockEntry) -> Self {
        Self {
            id: entry.id,
            family: entry.family,
            recursive: entry.recursive,
            first_seen: entry.first_seen,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConflictReport {
    /// the thread whose request got refused
    pub requester: ThreadId,
    pub lock: LockId,
    pub kind: LockKind,
    pub at: SourcePosition,
    /// the requester first, then the thread it collides with (the requester again on self-deadlock)
    pub threads: [ThreadSnapshot; 2],
    /// every lock registered at the time, ordered by id
    pub locks: Vec<LockSnapshot>,
}

impl ConflictReport {
    pub fn other(&self) -> ThreadId {
        self.threads[1].thread
    }
}

fn history_line(e: &PathEvent) -> String {
    // Display impls of the ids don't pad => go through strings
    format!(
        "  {:>9} {:<6} {:<12} {}",
        e.kind.to_string(),
        e.action.to_string(),
        e.lock.to_string(),
        e.at
    )
}

impl fmt::Display for ThreadSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "thread {}:", self.thread)?;
        for e in &self.history {
            writeln!(f, "{}", history_line(e))?;
        }
        writeln!(f, "  holding:")?;
        if self.holdings.is_empty() {
            writeln!(f, "    empty")?;
        }
        for (id, c) in &self.holdings {
            writeln!(
                f,
                "    {id} exclusive:{}, read:{}, write:{}",
                c.exclusive, c.read, c.write
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "thread {} requested {} {} ({})",
            self.requester, self.kind, self.lock, self.at
        )?;
        for thread in &self.threads {
            write!(f, "{thread}")?;
        }
        writeln!(f)?;
        writeln!(f, "registered locks:")?;
        for lock in &self.locks {
            let recursive = if lock.recursive { " recursive" } else { "" };
            writeln!(
                f,
                "  {:<12}{recursive} {} ({})",
                lock.id.to_string(),
                lock.family,
                lock.first_seen
            )?;
        }
        Ok(())
    }
}
