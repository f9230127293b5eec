//! Replays of typical locking mistakes against a fresh auditor each.
//! Every step states whether the auditor must let it through, a mismatch fails the scenario.

use std::{sync::Barrier, thread};

use lock_audit::{
    AuditError, AuditErrorKind, AuditedMutex, AuditedReentrantMutex, AuditedReentrantRwLock,
    AuditedRwLock, Auditor, AuditorConfig, LockId,
};

type Outcome = Result<(), String>;

fn step(name: &str, result: Result<(), AuditError>, pass: bool) -> Outcome {
    if let Err(e) = &result {
        log::info!("{name}: {e}");
    }
    match result.is_ok() == pass {
        true => Ok(()),
        false => Err(format!("{name}: expected {}", if pass { "success" } else { "refusal" })),
    }
}

fn attempt(name: &str, result: Result<bool, AuditError>, granted: bool) -> Outcome {
    match result {
        Ok(got) if got == granted => Ok(()),
        Ok(got) => Err(format!("{name}: try returned {got}")),
        Err(e) => Err(format!("{name}: {e}")),
    }
}

/// unlocking twice
pub fn relock(config: AuditorConfig) -> Outcome {
    let m = AuditedMutex::new(Auditor::shared(config));
    step("lock", m.lock(), true)?;
    step("unlock", unsafe { m.unlock() }, true)?;
    step("unlock again", unsafe { m.unlock() }, false)
}

pub fn try_lock(config: AuditorConfig) -> Outcome {
    let auditor = Auditor::shared(config);
    let (m1, m2) = (AuditedMutex::new(auditor.clone()), AuditedMutex::new(auditor));
    attempt("try m1", m1.try_lock(), true)?;
    step("unlock m1", unsafe { m1.unlock() }, true)?;
    step("lock m1", m1.lock(), true)?;
    attempt("try held m1", m1.try_lock(), false)?;
    step("lock m2", m2.lock(), true)?;
    step("unlock m1", unsafe { m1.unlock() }, true)?;
    step("unlock m2", unsafe { m2.unlock() }, true)
}

pub fn recursive(config: AuditorConfig) -> Outcome {
    let m = AuditedReentrantMutex::new(Auditor::shared(config));
    step("lock", m.lock(), true)?;
    step("lock nested", m.lock(), true)?;
    step("unlock nested", unsafe { m.unlock() }, true)?;
    step("unlock", unsafe { m.unlock() }, true)?;
    step("unlock unheld", unsafe { m.unlock() }, false)
}

/// a plain mutex taken twice between reentrant ones
pub fn recursive_mixed(config: AuditorConfig) -> Outcome {
    let auditor = Auditor::shared(config);
    let m1 = AuditedReentrantMutex::new(auditor.clone());
    let m2 = AuditedMutex::new(auditor);
    step("lock m1", m1.lock(), true)?;
    step("lock m2", m2.lock(), true)?;
    step("lock m1 nested", m1.lock(), true)?;
    step("unlock m1 nested", unsafe { m1.unlock() }, true)?;
    step("relock m2", m2.lock(), false)?;
    step("unlock m2", unsafe { m2.unlock() }, true)?;
    step("unlock m1", unsafe { m1.unlock() }, true)?;
    step("unlock m1 unheld", unsafe { m1.unlock() }, false)
}

pub fn read_write(config: AuditorConfig) -> Outcome {
    let rw = AuditedRwLock::new(Auditor::shared(config));
    step("read", rw.read_lock(), true)?;
    attempt("try read", rw.try_read_lock(), true)?;
    step("write over own read", rw.write_lock(), false)?;
    step("write unlock unheld", unsafe { rw.write_unlock() }, false)?;
    attempt("try write", rw.try_write_lock(), false)?;
    step("read unlock", unsafe { rw.read_unlock() }, true)?;
    step("read unlock", unsafe { rw.read_unlock() }, true)
}

/// reentrancy doesn't make a read upgradable
pub fn reentrant_read_write(config: AuditorConfig) -> Outcome {
    let rw = AuditedReentrantRwLock::new(Auditor::shared(config));
    step("read", rw.read_lock(), true)?;
    step("upgrade to write", rw.write_lock(), false)?;
    attempt("try read", rw.try_read_lock(), true)?;
    attempt("try write", rw.try_write_lock(), false)?;
    step("write unlock unheld", unsafe { rw.write_unlock() }, false)?;
    step("read unlock", unsafe { rw.read_unlock() }, true)?;
    step("read unlock", unsafe { rw.read_unlock() }, true)
}

const STRESS_THREADS: usize = 8;
const STRESS_ROUNDS: usize = 2000;

struct Shared {
    rw: AuditedRwLock,
    rl: AuditedReentrantMutex,
    l: AuditedMutex,
    rrw: AuditedReentrantRwLock,
}

/// read side, walks rw -> rl -> l -> rrw
fn reader_round(locks: &Shared) -> Result<(), AuditError> {
    locks.rw.read_lock()?;
    locks.l.lock()?;
    unsafe { locks.l.unlock()? };
    if locks.rl.try_lock()? {
        locks.l.lock()?;
        locks.rrw.write_lock()?;
        locks.rrw.read_lock()?;
        unsafe {
            locks.rrw.read_unlock()?;
            locks.rrw.write_unlock()?;
            locks.l.unlock()?;
            locks.rl.unlock()?;
        }
    }
    unsafe { locks.rw.read_unlock() }
}

/// write side, same order
fn writer_round(locks: &Shared) -> Result<(), AuditError> {
    locks.rw.write_lock()?;
    if locks.rl.try_lock()? {
        locks.l.lock()?;
        unsafe {
            locks.l.unlock()?;
            locks.rl.unlock()?;
        }
    }
    locks.l.lock()?;
    if locks.rrw.try_write_lock()? {
        locks.rrw.read_lock()?;
        unsafe {
            locks.rrw.read_unlock()?;
            locks.rrw.write_unlock()?;
        }
    }
    unsafe {
        locks.l.unlock()?;
        locks.rw.write_unlock()?;
    }
    if locks.l.try_lock()? {
        locks.rrw.write_lock()?;
        locks.rrw.read_lock()?;
        unsafe {
            locks.rrw.read_unlock()?;
            locks.rrw.write_unlock()?;
            locks.l.unlock()?;
        }
    }
    Ok(())
}

/// many threads, one consistent order => nothing to report
pub fn stress(config: AuditorConfig) -> Outcome {
    let auditor = Auditor::shared(config);
    let locks = Shared {
        rw: AuditedRwLock::new(auditor.clone()),
        rl: AuditedReentrantMutex::new(auditor.clone()),
        l: AuditedMutex::new(auditor.clone()),
        rrw: AuditedReentrantRwLock::new(auditor.clone()),
    };
    let failures: Vec<String> = thread::scope(|s| {
        let workers: Vec<_> = (0..STRESS_THREADS)
            .map(|i| {
                let locks = &locks;
                s.spawn(move || -> Result<(), AuditError> {
                    for _ in 0..STRESS_ROUNDS {
                        if i % 2 == 0 {
                            reader_round(locks)?;
                        } else {
                            writer_round(locks)?;
                        }
                    }
                    Ok(())
                })
            })
            .collect();
        workers
            .into_iter()
            .enumerate()
            .filter_map(|(i, w)| match w.join() {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("worker {i}: {e}")),
                Err(_) => Some(format!("worker {i} panicked")),
            })
            .collect()
    });
    if !failures.is_empty() {
        return Err(failures.join("\n"));
    }
    log::info!(
        "{} threads x {} rounds, no conflicts, {} locks still registered",
        STRESS_THREADS,
        STRESS_ROUNDS,
        auditor.registered_count()
    );
    Ok(())
}

/// A takes l1 then l2, B takes l2 then l1. Sequenced with barriers and checks only,
/// real locks in this order would just hang.
pub fn inversion(config: AuditorConfig) -> Outcome {
    let auditor = Auditor::new(config);
    let (l1, l2) = (LockId::new(), LockId::new());
    let b_holds_l2 = Barrier::new(2);
    let a_holds_both = Barrier::new(2);
    let a_may_leave = Barrier::new(2);

    let outcome = thread::scope(|s| {
        let a = s.spawn(|| -> Outcome {
            b_holds_l2.wait();
            let taken = auditor.check_lock(l1).and_then(|_| auditor.check_lock(l2));
            a_holds_both.wait();
            a_may_leave.wait();
            taken.map_err(|e| format!("thread A: {e}"))?;
            auditor.check_unlock(l2).map_err(|e| e.to_string())?;
            auditor.check_unlock(l1).map_err(|e| e.to_string())
        });

        // no early returns before the barriers, A would wait forever
        let held = auditor.check_lock(l2);
        b_holds_l2.wait();
        a_holds_both.wait();
        let refused = auditor.check_lock(l1);
        a_may_leave.wait();
        let a = a.join().map_err(|_| "thread A panicked".to_string())?;

        held.map_err(|e| format!("thread B: {e}"))?;
        auditor.check_unlock(l2).map_err(|e| e.to_string())?;
        a?;
        match refused {
            Err(e) if e.kind() == AuditErrorKind::OrderingConflict => {
                log::info!("{e}");
                Ok(())
            }
            Err(e) => Err(format!("unexpected refusal: {e}")),
            Ok(()) => Err("l2 -> l1 went through".to_string()),
        }
    });
    outcome?;
    match auditor.registered_count() {
        0 => Ok(()),
        n => Err(format!("{n} locks left registered")),
    }
}
