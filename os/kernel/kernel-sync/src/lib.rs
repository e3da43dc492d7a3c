//! # Boot-time synchronization primitives
//!
//! Small lock and once-cell types used while the memory manager comes up,
//! before any scheduler-aware primitive exists.
//!
//! - [`SpinMutex`] guards short critical sections such as taking a zeroed
//!   frame from the free lists.
//! - [`SyncOnceCell`] publishes a value exactly once, e.g. the installed
//!   boot logger.
//!
//! [`Mutex`] is parameterized over a raw lock that implements [`RawLock`]
//! and [`RawUnlock`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod mutex;
mod raw_spin;
mod sync_once_cell;

pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;
pub use sync_once_cell::SyncOnceCell;

/// Test-and-set mutex.
pub type SpinMutex<T> = Mutex<T, RawSpin>;

impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }
}

/// Acquire side of a raw lock.
pub trait RawLock {
    /// Spin until the lock is held by the caller.
    fn raw_lock(&self);

    /// Take the lock if it is free; never spins.
    fn raw_try_lock(&self) -> bool;

    /// Snapshot of whether someone holds the lock. Racy by nature.
    fn raw_is_locked(&self) -> bool;
}

/// Release side of a raw lock.
pub trait RawUnlock {
    /// # Safety
    /// The caller must currently hold the lock.
    unsafe fn raw_unlock(&self);
}
