//! # Spin read-write locks
//! Two busy-waiting shared/exclusive locks built on a pair of atomics:
//! - a reader counter: how many threads are inside for reading
//! - a writer flag: 0 - free, 1 - taken (the reentrant flavour counts nested writes in it)
//!
//! No thread is ever put to sleep, so hold times should stay short.
//! There's also no fairness: a stream of writers starves readers and the other way around.
//!
//! Unlocking is `unsafe`. The primitives don't track who locked what, so an unmatched unlock
//! silently corrupts the counters. Pairing is what [crate::audit] checks.

mod reentrant;
mod rwlock;

pub use reentrant::RawReentrantSpinRwLock;
pub use rwlock::{RawSpinRwLock, SpinRwLock};
