//! # Reentrant spin read-write lock
//! Same handshake as [super::RawSpinRwLock], plus the id of the thread holding the write side.
//!
//! The owner skips all the contention logic:
//! - reading while writing is just a counter bump, the owner can't race itself
//! - writing again bumps the writer counter, which doubles as the nesting depth
//!
//! Everyone else goes through the plain algorithms and therefore waits for the owner.

use std::sync::atomic::{
    AtomicUsize,
    Ordering::{Relaxed, Release},
};

use lock_api::GetThreadId;

use super::RawSpinRwLock;
use crate::thread_token::ThreadToken;

/// no thread owns the write side
const NO_OWNER: usize = 0;

#[derive(Debug)]
pub struct RawReentrantSpinRwLock<G = ThreadToken> {
    inner: RawSpinRwLock,
    /// only ever written by the thread that holds the writer flag
    owner: AtomicUsize,
    get_thread_id: G,
}

impl<G: GetThreadId> Default for RawReentrantSpinRwLock<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GetThreadId> RawReentrantSpinRwLock<G> {
    pub const fn new() -> Self {
        Self {
            inner: RawSpinRwLock::new(),
            owner: AtomicUsize::new(NO_OWNER),
            get_thread_id: G::INIT,
        }
    }

    fn current(&self) -> usize {
        self.get_thread_id.nonzero_thread_id().get()
    }

    /// Relaxed is fine: a thread can only find its own id there if it put it there itself
    fn is_owner(&self, me: usize) -> bool {
        self.owner.load(Relaxed) == me
    }

    pub fn read_lock(&self) {
        if self.is_owner(self.current()) {
            self.inner.readers.fetch_add(1, Relaxed);
        } else {
            self.inner.read_lock();
        }
    }

    pub fn try_read_lock(&self) -> bool {
        if self.is_owner(self.current()) {
            self.inner.readers.fetch_add(1, Relaxed);
            true
        } else {
            self.inner.try_read_lock()
        }
    }

    /// # Safety
    /// The calling thread must hold a read lock on this lock.
    pub unsafe fn read_unlock(&self) {
        self.inner.read_unlock();
    }

    pub fn write_lock(&self) {
        let me = self.current();
        if self.is_owner(me) {
            self.inner.writer.fetch_add(1, Relaxed);
        } else {
            self.inner.write_lock();
            self.owner.store(me, Relaxed);
        }
    }

    pub fn try_write_lock(&self) -> bool {
        let me = self.current();
        if self.is_owner(me) {
            self.inner.writer.fetch_add(1, Relaxed);
            return true;
        }
        if !self.inner.try_write_lock() {
            return false;
        }
        self.owner.store(me, Relaxed);
        true
    }

    /// Drops one level of write nesting, the last one frees the lock.
    ///
    /// The decrement happens under an owner-side read lock. A writer that wins the flag right
    /// after the decrement is then stuck draining readers until the owner field is cleared,
    /// so it can't get its own id overwritten by our clear.
    ///
    /// # Panics
    /// If the calling thread isn't the owner.
    ///
    /// # Safety
    /// The calling thread must hold the write lock at least once.
    pub unsafe fn write_unlock(&self) {
        let me = self.current();
        assert!(
            self.is_owner(me),
            "write_unlock called by a thread that doesn't own the lock"
        );
        self.read_lock();
        if self.inner.writer.fetch_sub(1, Release) == 1 {
            self.owner.store(NO_OWNER, Relaxed);
        }
        self.inner.read_unlock();
    }

    pub fn is_owned_by_current_thread(&self) -> bool {
        self.is_owner(self.current())
    }

    /// Nesting depth of the write side, 0 if nobody writes
    pub fn write_depth(&self) -> u32 {
        self.inner.writer.load(Relaxed)
    }

    pub fn reader_count(&self) -> i32 {
        self.inner.reader_count()
    }
}

#[cfg(test)]
mod test {
    use std::{sync::atomic::AtomicUsize, thread};

    use super::*;

    #[test]
    fn nested_writes_need_matching_unlocks() {
        let lock: RawReentrantSpinRwLock = RawReentrantSpinRwLock::new();
        lock.write_lock();
        lock.write_lock();
        assert!(lock.try_write_lock());
        assert_eq!(lock.write_depth(), 3);

        unsafe { lock.write_unlock() };
        unsafe { lock.write_unlock() };
        assert!(lock.is_owned_by_current_thread());
        assert_eq!(lock.write_depth(), 1);

        unsafe { lock.write_unlock() };
        assert!(!lock.is_owned_by_current_thread());
        assert_eq!(lock.write_depth(), 0);
        assert_eq!(lock.reader_count(), 0);
    }

    #[test]
    fn owner_reads_while_writing() {
        let lock: RawReentrantSpinRwLock = RawReentrantSpinRwLock::new();
        lock.write_lock();
        lock.read_lock();
        assert!(lock.try_read_lock());
        assert_eq!(lock.reader_count(), 2);
        unsafe {
            lock.read_unlock();
            lock.read_unlock();
            lock.write_unlock();
        }
        assert_eq!(lock.reader_count(), 0);
        assert_eq!(lock.write_depth(), 0);
    }

    #[test]
    fn others_are_locked_out_while_owned() {
        let lock: RawReentrantSpinRwLock = RawReentrantSpinRwLock::new();
        lock.write_lock();
        lock.write_lock();
        thread::scope(|s| {
            s.spawn(|| {
                assert!(!lock.is_owned_by_current_thread());
                assert!(!lock.try_write_lock());
                assert!(!lock.try_read_lock());
            });
        });
        unsafe { lock.write_unlock() };
        thread::scope(|s| {
            s.spawn(|| assert!(!lock.try_write_lock()));
        });
        unsafe { lock.write_unlock() };
        thread::scope(|s| {
            s.spawn(|| {
                assert!(lock.try_write_lock());
                assert!(lock.is_owned_by_current_thread());
                unsafe { lock.write_unlock() };
            });
        });
    }

    #[test]
    fn write_unlock_by_a_stranger_panics() {
        let lock: RawReentrantSpinRwLock = RawReentrantSpinRwLock::new();
        lock.write_lock();
        thread::scope(|s| {
            let stranger = s.spawn(|| unsafe { lock.write_unlock() });
            assert!(stranger.join().is_err());
        });
        // nothing changed for the real owner
        assert!(lock.is_owned_by_current_thread());
        unsafe { lock.write_unlock() };
    }

    #[test]
    fn nested_writers_exclude_each_other() {
        let lock: RawReentrantSpinRwLock = RawReentrantSpinRwLock::new();
        let counter = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        lock.write_lock();
                        lock.write_lock();
                        // a torn increment would show up as a lost update
                        let v = counter.load(Relaxed);
                        counter.store(v + 1, Relaxed);
                        unsafe {
                            lock.write_unlock();
                            lock.write_unlock();
                        }
                    }
                });
            }
        });
        assert_eq!(counter.load(Relaxed), 4000);
        assert_eq!(lock.write_depth(), 0);
    }
}
