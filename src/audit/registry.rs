use std::collections::BTreeMap;

use super::{LockFamily, LockId, LockKind, SourcePosition};
use crate::thread_token::ThreadId;

/// thread => nesting count, only threads with count > 0
pub type Holders = BTreeMap<ThreadId, usize>;

/// Everything known about one live lock
#[derive(Debug)]
pub struct LockEntry {
    pub id: LockId,
    pub family: LockFamily,
    pub recursive: bool,
    pub first_seen: SourcePosition,
    exclusive: Holders,
    read: Holders,
    write: Holders,
}

impl LockEntry {
    pub fn new(id: LockId, family: LockFamily, recursive: bool, first_seen: SourcePosition) -> Self {
        Self {
            id,
            family,
            recursive,
            first_seen,
            exclusive: Holders::new(),
            read: Holders::new(),
            write: Holders::new(),
        }
    }

    /// Same family and reentrancy as on first use
    pub fn matches(&self, kind: LockKind, recursive: bool) -> bool {
        self.family == kind.family() && self.recursive == recursive
    }

    pub fn holders(&self, kind: LockKind) -> &Holders {
        match kind {
            LockKind::Exclusive => &self.exclusive,
            LockKind::Read => &self.read,
            LockKind::Write => &self.write,
        }
    }

    fn holders_mut(&mut self, kind: LockKind) -> &mut Holders {
        match kind {
            LockKind::Exclusive => &mut self.exclusive,
            LockKind::Read => &mut self.read,
            LockKind::Write => &mut self.write,
        }
    }

    /// Threads a request of this kind has to get past.
    /// Writers block everyone. Readers only block writers, but both maps are visited
    /// and the conflict check sorts out reader/reader overlap.
    pub fn competitors(&self, kind: LockKind) -> impl Iterator<Item = ThreadId> + '_ {
        let (first, second) = match kind {
            LockKind::Exclusive => (&self.exclusive, None),
            LockKind::Read | LockKind::Write => (&self.write, Some(&self.read)),
        };
        first
            .keys()
            .chain(second.into_iter().flat_map(|holders| holders.keys()))
            .copied()
    }

    pub fn acquire(&mut self, kind: LockKind, thread: ThreadId) {
        *self.holders_mut(kind).entry(thread).or_insert(0) += 1;
    }

    /// # Panics
    /// If the thread doesn't hold the lock in this mode, the caller's path said it does.
    pub fn release(&mut self, kind: LockKind, thread: ThreadId) {
        let id = self.id;
        let holders = self.holders_mut(kind);
        let Some(count) = holders.get_mut(&thread) else {
            unreachable!("{id} has no {kind} holder {thread}");
        };
        *count -= 1;
        if *count == 0 {
            holders.remove(&thread);
        }
    }

    /// No thread holds the lock in any mode
    pub fn is_idle(&self) -> bool {
        self.exclusive.is_empty() && self.read.is_empty() && self.write.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(family: LockFamily) -> LockEntry {
        LockEntry::new(LockId::new(), family, false, SourcePosition::caller())
    }

    #[test]
    fn kind_and_reentrancy_must_match() {
        let e = entry(LockFamily::ReadWrite);
        assert!(e.matches(LockKind::Read, false));
        assert!(e.matches(LockKind::Write, false));
        assert!(!e.matches(LockKind::Exclusive, false));
        assert!(!e.matches(LockKind::Read, true));
    }

    #[test]
    fn readers_compete_with_writers_and_readers() {
        let me = ThreadId::current();
        let mut e = entry(LockFamily::ReadWrite);
        e.acquire(LockKind::Read, me);
        e.acquire(LockKind::Read, me);
        assert_eq!(e.competitors(LockKind::Write).collect::<Vec<_>>(), [me]);
        assert_eq!(e.competitors(LockKind::Exclusive).count(), 0);
        assert_eq!(e.holders(LockKind::Read)[&me], 2);

        e.release(LockKind::Read, me);
        assert!(!e.is_idle());
        e.release(LockKind::Read, me);
        assert!(e.is_idle());
    }
}
