//! # Thread identity
//! Both the reentrant spin lock and the auditor need to answer "who is calling?".
//!
//! [std::thread::ThreadId] can't be stored in an atomic (no stable `as_u64`), so every thread
//! gets its own non-zero number the first time it asks. Numbers come from a global counter and
//! are never handed out twice, even after the thread is gone.
//!
//! The source plugs into [lock_api::GetThreadId], the same seam `lock_api`'s reentrant mutex uses.
//!
//! Since ids never come back, whoever keeps per-thread state needs to learn when a thread is
//! gone. An [ExitQueue] gets the ids of watched threads pushed into it as they exit.

use std::{
    cell::RefCell,
    fmt,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc, Weak,
    },
};

use lock_api::GetThreadId;
use parking_lot::Mutex;

/// Default thread identity source: one token per thread, minted lazily
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadToken;

// SAFETY: the token lives in a thread-local minted from a global counter =>
// two live threads can never observe the same value
unsafe impl GetThreadId for ThreadToken {
    const INIT: Self = ThreadToken;

    fn nonzero_thread_id(&self) -> NonZeroUsize {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        thread_local! {
            // Relaxed is enough: uniqueness comes from the RMW total order, nothing else is published
            static TOKEN: NonZeroUsize = NonZeroUsize::MIN.saturating_add(NEXT.fetch_add(1, Relaxed));
        }
        TOKEN.with(|t| *t)
    }
}

/// Thread identity as seen by the auditor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroUsize);

impl ThreadId {
    pub fn current() -> Self {
        Self(ThreadToken.nonzero_thread_id())
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0.get())
    }
}

/// Ids of exited threads, waiting to be picked up
#[derive(Debug, Default)]
pub struct ExitQueue(Mutex<Vec<ThreadId>>);

impl ExitQueue {
    /// Has the current thread's id pushed here when it exits.
    /// The queue is held weakly, a queue dropped meanwhile just gets skipped.
    pub fn watch_current_thread(self: &Arc<Self>) {
        let thread = ThreadId::current();
        // fails only while the thread is already tearing down its locals => nothing left to watch
        let _ = EXIT_WATCH.try_with(|watch| {
            let mut queues = watch.0.borrow_mut();
            queues.retain(|queue| queue.strong_count() > 0);
            queues.push(Arc::downgrade(self));
            *watch.1.borrow_mut() = Some(thread);
        });
    }

    pub fn drain(&self) -> Vec<ThreadId> {
        std::mem::take(&mut *self.0.lock())
    }
}

/// queues to notify + the id to notify them with, captured while locals are still alive
struct ExitWatch(RefCell<Vec<Weak<ExitQueue>>>, RefCell<Option<ThreadId>>);

impl Drop for ExitWatch {
    fn drop(&mut self) {
        let Some(thread) = self.1.get_mut().take() else {
            return;
        };
        for queue in self.0.get_mut().drain(..) {
            if let Some(queue) = queue.upgrade() {
                queue.0.lock().push(thread);
            }
        }
    }
}

thread_local! {
    static EXIT_WATCH: ExitWatch = const { ExitWatch(RefCell::new(Vec::new()), RefCell::new(None)) };
}

#[cfg(test)]
mod test {
    use std::{collections::HashSet, sync::Mutex, thread};

    use super::*;

    #[test]
    fn stable_within_a_thread() {
        assert_eq!(ThreadId::current(), ThreadId::current());
    }

    #[test]
    fn unique_across_threads() {
        let seen = Mutex::new(HashSet::new());
        seen.lock().unwrap().insert(ThreadId::current());
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    assert!(seen.lock().unwrap().insert(ThreadId::current()));
                });
            }
        });
        assert_eq!(seen.lock().unwrap().len(), 9);
    }

    #[test]
    fn never_reused_after_exit() {
        let first = thread::spawn(ThreadId::current).join().unwrap();
        let second = thread::spawn(ThreadId::current).join().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn exit_queue_hears_about_watched_threads_only() {
        let queue = Arc::new(ExitQueue::default());
        let watched = {
            let queue = queue.clone();
            thread::spawn(move || {
                queue.watch_current_thread();
                queue.watch_current_thread();
                ThreadId::current()
            })
            .join()
            .unwrap()
        };
        thread::spawn(ThreadId::current).join().unwrap();

        // watched twice, reported twice, that's harmless for consumers
        assert_eq!(queue.drain(), [watched, watched]);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn dropped_queue_is_skipped() {
        let queue = Arc::new(ExitQueue::default());
        let weak = Arc::downgrade(&queue);
        thread::spawn(move || {
            queue.watch_current_thread();
            drop(queue);
        })
        .join()
        .unwrap();
        assert!(weak.upgrade().is_none());
    }
}
