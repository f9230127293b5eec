//! # Audited locks
//! A raw lock, its [LockId] and the [Auditor] it reports to, glued together so that no call
//! site can forget a check. Every method is `#[track_caller]`, so reports point at user code.
//!
//! - blocking lock: check first, take the lock only if the check passed
//! - try-lock: attempt and bookkeeping happen under the auditor mutex, see [Auditor::try_acquire]
//! - unlock: check first, release the lock only if the check passed => an unmatched unlock
//!   never reaches the primitive
//!
//! A refused blocking lock returns the error *instead of* taking the lock. Otherwise the
//! thread would hang right there and nobody would read the report.
//!
//! Reading on top of your own write is allowed by the auditor, the write side already excludes
//! everyone else. [AuditedRwLock] is not reentrant though: `read_lock` there spins forever on
//! the thread's own writer flag and `try_read_lock` returns `false`. Use [AuditedReentrantRwLock]
//! when a writer needs to read through code that takes the read side.
//!
//! Dropping a lock someone still holds is logged, and the auditor forgets the lock.

use std::sync::Arc;

use lock_api::RawReentrantMutex;

use crate::{
    audit::{AuditError, Auditor, LockId, LockKind, SourcePosition},
    spin::{RawReentrantSpinRwLock, RawSpinRwLock},
    thread_token::ThreadToken,
};

/// A raw lock that can be put under audit
pub trait Primitive {
    const INIT: Self;
    /// whether the lock lets its holder in again
    const RECURSIVE: bool;
}

/// Lock/unlock, audited as [LockKind::Exclusive]
pub trait ExclusivePrimitive: Primitive {
    fn lock(&self);
    fn try_lock(&self) -> bool;
    /// # Safety
    /// The calling thread must hold the lock.
    unsafe fn unlock(&self);
}

/// Read/write, audited as [LockKind::Read] and [LockKind::Write]
pub trait SharedPrimitive: Primitive {
    fn read_lock(&self);
    fn try_read_lock(&self) -> bool;
    /// # Safety
    /// The calling thread must hold a read lock.
    unsafe fn read_unlock(&self);
    fn write_lock(&self);
    fn try_write_lock(&self) -> bool;
    /// # Safety
    /// The calling thread must hold the write lock.
    unsafe fn write_unlock(&self);
}

pub type AuditedMutex = Audited<parking_lot::RawMutex>;
pub type AuditedReentrantMutex = Audited<RawReentrantMutex<parking_lot::RawMutex, ThreadToken>>;
pub type AuditedRwLock = Audited<RawSpinRwLock>;
pub type AuditedReentrantRwLock = Audited<RawReentrantSpinRwLock>;

pub struct Audited<R> {
    id: LockId,
    raw: R,
    auditor: Arc<Auditor>,
}

impl<R: Primitive> Audited<R> {
    /// Every new lock gets a fresh id, so it can't be mistaken for a dead one
    pub fn new(auditor: Arc<Auditor>) -> Self {
        Self {
            id: LockId::new(),
            raw: R::INIT,
            auditor,
        }
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    pub fn raw(&self) -> &R {
        &self.raw
    }

    #[track_caller]
    fn checked(&self, kind: LockKind, take: impl FnOnce(&R)) -> Result<(), AuditError> {
        self.auditor
            .check_acquire(self.id, kind, R::RECURSIVE, SourcePosition::caller())?;
        take(&self.raw);
        Ok(())
    }

    #[track_caller]
    fn attempted(&self, kind: LockKind, attempt: impl FnOnce(&R) -> bool) -> Result<bool, AuditError> {
        self.auditor
            .try_acquire(self.id, kind, R::RECURSIVE, SourcePosition::caller(), || attempt(&self.raw))
    }

    /// # Safety
    /// `release` must be sound to call once the auditor confirmed the thread holds the lock as `kind`.
    #[track_caller]
    unsafe fn released(&self, kind: LockKind, release: impl FnOnce(&R)) -> Result<(), AuditError> {
        self.auditor
            .check_release(self.id, kind, SourcePosition::caller())?;
        release(&self.raw);
        Ok(())
    }
}

impl<R> Drop for Audited<R> {
    fn drop(&mut self) {
        if self.auditor.forget(self.id) {
            log::warn!("{} dropped while still held", self.id);
        }
    }
}

impl<R: ExclusivePrimitive> Audited<R> {
    #[track_caller]
    pub fn lock(&self) -> Result<(), AuditError> {
        self.checked(LockKind::Exclusive, R::lock)
    }

    #[track_caller]
    pub fn try_lock(&self) -> Result<bool, AuditError> {
        self.attempted(LockKind::Exclusive, R::try_lock)
    }

    /// # Safety
    /// Only matters with a disabled auditor: then nothing stops an unmatched unlock and the
    /// calling thread must hold the lock.
    #[track_caller]
    pub unsafe fn unlock(&self) -> Result<(), AuditError> {
        // SAFETY: the auditor confirmed (or the caller promised) that we hold it
        self.released(LockKind::Exclusive, |raw| unsafe { raw.unlock() })
    }
}

impl<R: SharedPrimitive> Audited<R> {
    #[track_caller]
    pub fn read_lock(&self) -> Result<(), AuditError> {
        self.checked(LockKind::Read, R::read_lock)
    }

    #[track_caller]
    pub fn try_read_lock(&self) -> Result<bool, AuditError> {
        self.attempted(LockKind::Read, R::try_read_lock)
    }

    /// # Safety
    /// See [Audited::unlock].
    #[track_caller]
    pub unsafe fn read_unlock(&self) -> Result<(), AuditError> {
        // SAFETY: the auditor confirmed (or the caller promised) a read lock is held
        self.released(LockKind::Read, |raw| unsafe { raw.read_unlock() })
    }

    #[track_caller]
    pub fn write_lock(&self) -> Result<(), AuditError> {
        self.checked(LockKind::Write, R::write_lock)
    }

    #[track_caller]
    pub fn try_write_lock(&self) -> Result<bool, AuditError> {
        self.attempted(LockKind::Write, R::try_write_lock)
    }

    /// # Safety
    /// See [Audited::unlock].
    #[track_caller]
    pub unsafe fn write_unlock(&self) -> Result<(), AuditError> {
        // SAFETY: the auditor confirmed (or the caller promised) the write lock is held
        self.released(LockKind::Write, |raw| unsafe { raw.write_unlock() })
    }
}

impl Primitive for parking_lot::RawMutex {
    const INIT: Self = <parking_lot::RawMutex as lock_api::RawMutex>::INIT;
    const RECURSIVE: bool = false;
}

impl ExclusivePrimitive for parking_lot::RawMutex {
    fn lock(&self) {
        lock_api::RawMutex::lock(self);
    }

    fn try_lock(&self) -> bool {
        lock_api::RawMutex::try_lock(self)
    }

    unsafe fn unlock(&self) {
        lock_api::RawMutex::unlock(self);
    }
}

impl Primitive for RawReentrantMutex<parking_lot::RawMutex, ThreadToken> {
    const INIT: Self = RawReentrantMutex::INIT;
    const RECURSIVE: bool = true;
}

impl ExclusivePrimitive for RawReentrantMutex<parking_lot::RawMutex, ThreadToken> {
    fn lock(&self) {
        RawReentrantMutex::lock(self);
    }

    fn try_lock(&self) -> bool {
        RawReentrantMutex::try_lock(self)
    }

    unsafe fn unlock(&self) {
        RawReentrantMutex::unlock(self);
    }
}

impl Primitive for RawSpinRwLock {
    const INIT: Self = RawSpinRwLock::new();
    const RECURSIVE: bool = false;
}

impl SharedPrimitive for RawSpinRwLock {
    fn read_lock(&self) {
        RawSpinRwLock::read_lock(self);
    }

    fn try_read_lock(&self) -> bool {
        RawSpinRwLock::try_read_lock(self)
    }

    unsafe fn read_unlock(&self) {
        RawSpinRwLock::read_unlock(self);
    }

    fn write_lock(&self) {
        RawSpinRwLock::write_lock(self);
    }

    fn try_write_lock(&self) -> bool {
        RawSpinRwLock::try_write_lock(self)
    }

    unsafe fn write_unlock(&self) {
        RawSpinRwLock::write_unlock(self);
    }
}

impl Primitive for RawReentrantSpinRwLock {
    const INIT: Self = RawReentrantSpinRwLock::new();
    const RECURSIVE: bool = true;
}

impl SharedPrimitive for RawReentrantSpinRwLock {
    fn read_lock(&self) {
        RawReentrantSpinRwLock::read_lock(self);
    }

    fn try_read_lock(&self) -> bool {
        RawReentrantSpinRwLock::try_read_lock(self)
    }

    unsafe fn read_unlock(&self) {
        RawReentrantSpinRwLock::read_unlock(self);
    }

    fn write_lock(&self) {
        RawReentrantSpinRwLock::write_lock(self);
    }

    fn try_write_lock(&self) -> bool {
        RawReentrantSpinRwLock::try_write_lock(self)
    }

    unsafe fn write_unlock(&self) {
        RawReentrantSpinRwLock::write_unlock(self);
    }
}
