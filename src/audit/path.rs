//! What a single thread did lately and what it holds right now

use std::collections::{BTreeMap, VecDeque};

use super::{Action, LockId, LockKind, SourcePosition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathEvent {
    pub lock: LockId,
    pub at: SourcePosition,
    pub kind: LockKind,
    pub action: Action,
}

/// Nesting counts of one thread on one lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HoldCounts {
    pub exclusive: usize,
    pub read: usize,
    pub write: usize,
    /// always the sum of the three above
    pub total: usize,
}

impl HoldCounts {
    pub fn get(&self, kind: LockKind) -> usize {
        match kind {
            LockKind::Exclusive => self.exclusive,
            LockKind::Read => self.read,
            LockKind::Write => self.write,
        }
    }

    fn slot(&mut self, kind: LockKind) -> &mut usize {
        match kind {
            LockKind::Exclusive => &mut self.exclusive,
            LockKind::Read => &mut self.read,
            LockKind::Write => &mut self.write,
        }
    }
}

#[derive(Debug, Default)]
pub struct LockPath {
    /// oldest first, bounded
    history: VecDeque<PathEvent>,
    /// only locks with total > 0
    holdings: BTreeMap<LockId, HoldCounts>,
}

impl LockPath {
    pub fn last(&self) -> Option<&PathEvent> {
        self.history.back()
    }

    pub fn history(&self) -> impl DoubleEndedIterator<Item = &PathEvent> {
        self.history.iter()
    }

    pub fn holdings(&self) -> &BTreeMap<LockId, HoldCounts> {
        &self.holdings
    }

    pub fn holding(&self, lock: LockId) -> Option<&HoldCounts> {
        self.holdings.get(&lock)
    }

    pub fn acquire(&mut self, event: PathEvent, capacity: usize) {
        let counts = self.holdings.entry(event.lock).or_default();
        *counts.slot(event.kind) += 1;
        counts.total += 1;
        self.push(event, capacity);
    }

    /// Returns false and changes nothing if the thread doesn't hold the lock in this mode
    pub fn release(&mut self, event: PathEvent, capacity: usize) -> bool {
        let Some(counts) = self.holdings.get_mut(&event.lock) else {
            return false;
        };
        let slot = counts.slot(event.kind);
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        assert!(counts.total > 0, "hold total out of sync for {}", event.lock);
        counts.total -= 1;
        if counts.total == 0 {
            self.holdings.remove(&event.lock);
        }
        self.push(event, capacity);
        true
    }

    /// Drops the holdings on a lock that no longer exists, history stays as it was
    pub fn forget(&mut self, lock: LockId) -> bool {
        self.holdings.remove(&lock).is_some()
    }

    fn push(&mut self, event: PathEvent, capacity: usize) {
        self.history.push_back(event);
        while self.history.len() > capacity {
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn event(lock: LockId, kind: LockKind, action: Action) -> PathEvent {
        PathEvent {
            lock,
            at: SourcePosition::caller(),
            kind,
            action,
        }
    }

    #[test]
    fn counts_follow_acquire_and_release() {
        let l = LockId::new();
        let mut path = LockPath::default();
        path.acquire(event(l, LockKind::Read, Action::Acquire), 50);
        path.acquire(event(l, LockKind::Write, Action::Acquire), 50);
        assert_eq!(
            path.holding(l),
            Some(&HoldCounts { exclusive: 0, read: 1, write: 1, total: 2 })
        );

        // nothing held in exclusive mode => refused, untouched
        assert!(!path.release(event(l, LockKind::Exclusive, Action::Release), 50));
        assert_eq!(path.history().count(), 2);

        assert!(path.release(event(l, LockKind::Read, Action::Release), 50));
        assert!(path.release(event(l, LockKind::Write, Action::Release), 50));
        assert!(path.holdings().is_empty());
        assert!(!path.release(event(l, LockKind::Write, Action::Release), 50));
        assert_eq!(path.last().map(|e| e.action), Some(Action::Release));
    }

    #[test]
    fn history_drops_the_oldest() {
        let mut path = LockPath::default();
        let locks: Vec<_> = (0..5).map(|_| LockId::new()).collect();
        for &l in &locks {
            path.acquire(event(l, LockKind::Exclusive, Action::Acquire), 3);
        }
        let kept: Vec<_> = path.history().map(|e| e.lock).collect();
        assert_eq!(kept, locks[2..]);
        // holdings aren't bounded by the history
        assert_eq!(path.holdings().len(), 5);
    }
}
