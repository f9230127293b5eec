//! # Plain spin read-write lock
//! The reader count and the writer flag form a handshake:
//! - a reader bumps the count first, then looks at the flag
//! - a writer sets the flag first, then looks at the count
//!
//! Whoever comes second sees the other one, as long as all 4 operations are SeqCst.
//! With anything weaker the reader and the writer may both miss each other and walk in together.

use std::{
    hint::spin_loop,
    sync::atomic::{
        AtomicI32, AtomicU32,
        Ordering::{Acquire, Relaxed, Release, SeqCst},
    },
};

use lock_api::{GuardSend, RawRwLock};

/// Guard-based wrapper, so the primitive can protect data the usual way
pub type SpinRwLock<Y> = lock_api::RwLock<RawSpinRwLock, Y>;

#[derive(Debug, Default)]
pub struct RawSpinRwLock {
    /// number of readers inside, including the ones about to roll back
    pub(super) readers: AtomicI32,
    /// 0 - no writer, 1 - a writer holds or is draining readers
    pub(super) writer: AtomicU32,
}

impl RawSpinRwLock {
    pub const fn new() -> Self {
        Self {
            readers: AtomicI32::new(0),
            writer: AtomicU32::new(0),
        }
    }

    /// Spins until there's no writer and our increment sticks
    pub fn read_lock(&self) {
        loop {
            while self.writer.load(Acquire) != 0 {
                spin_loop();
            }
            if self.try_read_lock() {
                return;
            }
        }
    }

    /// One optimistic increment, rolled back if a writer showed up meanwhile
    pub fn try_read_lock(&self) -> bool {
        self.readers.fetch_add(1, SeqCst);
        if self.writer.load(SeqCst) != 0 {
            // Release keeps the release sequence of earlier readers intact for a draining writer
            self.readers.fetch_sub(1, Release);
            return false;
        }
        true
    }

    /// # Safety
    /// The calling thread must hold a read lock taken with [Self::read_lock] or [Self::try_read_lock].
    pub unsafe fn read_unlock(&self) {
        self.readers.fetch_sub(1, Release);
    }

    /// Takes the flag first, then waits for the readers already inside.
    /// New readers are turned away from the moment the flag is set.
    pub fn write_lock(&self) {
        while self
            .writer
            .compare_exchange_weak(0, 1, SeqCst, Relaxed)
            .is_err()
        {
            // wait on a plain load, CAS in a loop hammers the cache line
            while self.writer.load(Relaxed) != 0 {
                spin_loop();
            }
        }
        self.drain_readers();
    }

    /// Never leaves the flag behind: if readers are inside, the flag is given back
    pub fn try_write_lock(&self) -> bool {
        if self
            .writer
            .compare_exchange(0, 1, SeqCst, Relaxed)
            .is_err()
        {
            return false;
        }
        if self.readers.load(SeqCst) != 0 {
            self.writer.store(0, Release);
            return false;
        }
        true
    }

    /// # Safety
    /// Some thread must hold the write lock. Which one isn't checked.
    pub unsafe fn write_unlock(&self) {
        self.writer.fetch_sub(1, Release);
    }

    pub fn reader_count(&self) -> i32 {
        self.readers.load(Relaxed)
    }

    pub fn is_write_locked(&self) -> bool {
        self.writer.load(Relaxed) != 0
    }

    pub(super) fn drain_readers(&self) {
        while self.readers.load(SeqCst) != 0 {
            spin_loop();
        }
    }
}

// SAFETY: shared access is granted only while the writer flag is clear and the reader is counted,
// exclusive access only while the flag is ours and the count is 0
unsafe impl RawRwLock for RawSpinRwLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    // no ownership => a guard may be dropped on another thread
    type GuardMarker = GuardSend;

    fn lock_shared(&self) {
        self.read_lock();
    }

    fn try_lock_shared(&self) -> bool {
        self.try_read_lock()
    }

    unsafe fn unlock_shared(&self) {
        self.read_unlock();
    }

    fn lock_exclusive(&self) {
        self.write_lock();
    }

    fn try_lock_exclusive(&self) -> bool {
        self.try_write_lock()
    }

    unsafe fn unlock_exclusive(&self) {
        self.write_unlock();
    }

    fn is_locked(&self) -> bool {
        self.is_write_locked() || self.reader_count() != 0
    }

    fn is_locked_exclusive(&self) -> bool {
        self.is_write_locked()
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize},
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn writers_exclude_each_other() {
        let counter = SpinRwLock::new(0u64);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        *counter.write() += 1;
                    }
                });
            }
        });
        assert_eq!(*counter.read(), 8000);
    }

    #[test]
    fn readers_share_the_lock() {
        let lock = RawSpinRwLock::new();
        lock.read_lock();
        thread::scope(|s| {
            s.spawn(|| {
                assert!(lock.try_read_lock());
                unsafe { lock.read_unlock() };
            });
        });
        assert_eq!(lock.reader_count(), 1);
        unsafe { lock.read_unlock() };
        assert!(!RawRwLock::is_locked(&lock));
    }

    #[test]
    fn try_write_gives_the_flag_back_when_readers_are_inside() {
        let lock = RawSpinRwLock::new();
        lock.read_lock();
        assert!(!lock.try_write_lock());
        assert!(!lock.is_write_locked());
        // the reader isn't disturbed by the failed attempt
        assert_eq!(lock.reader_count(), 1);

        unsafe { lock.read_unlock() };
        assert!(lock.try_write_lock());
        assert!(lock.is_write_locked());
        unsafe { lock.write_unlock() };
        assert!(!lock.is_write_locked());
    }

    #[test]
    fn readers_are_turned_away_by_a_writer() {
        let lock = RawSpinRwLock::new();
        lock.write_lock();
        assert!(!lock.try_read_lock());
        assert_eq!(lock.reader_count(), 0);
        assert!(!lock.try_write_lock());
        unsafe { lock.write_unlock() };
        assert!(lock.try_read_lock());
        unsafe { lock.read_unlock() };
    }

    #[test]
    fn writer_waits_for_readers_to_drain() {
        let lock = RawSpinRwLock::new();
        let written = AtomicBool::new(false);
        lock.read_lock();
        thread::scope(|s| {
            s.spawn(|| {
                lock.write_lock();
                written.store(true, SeqCst);
                unsafe { lock.write_unlock() };
            });

            // the writer grabs the flag right away, but can't get past the reader
            while !lock.is_write_locked() {
                spin_loop();
            }
            thread::sleep(Duration::from_millis(50));
            assert!(!written.load(SeqCst));
            assert!(!lock.try_read_lock());

            unsafe { lock.read_unlock() };
        });
        assert!(written.load(SeqCst));
        assert!(!RawRwLock::is_locked(&lock));
    }

    #[test]
    fn readers_never_see_a_half_done_write() {
        // a writer keeps the pair equal, readers must never observe them apart
        let lock = RawSpinRwLock::new();
        let a = AtomicUsize::new(0);
        let b = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    for _ in 0..2000 {
                        lock.write_lock();
                        let v = a.load(Relaxed);
                        a.store(v + 1, Relaxed);
                        b.store(v + 1, Relaxed);
                        unsafe { lock.write_unlock() };
                    }
                });
            }
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..2000 {
                        lock.read_lock();
                        assert_eq!(a.load(Relaxed), b.load(Relaxed));
                        unsafe { lock.read_unlock() };
                    }
                });
            }
        });
        assert_eq!(a.load(Relaxed), 4000);
    }
}
