//! # Kernel synchronization primitives
//!
//! Two building blocks back every lock domain in the kernel memory allocator:
//!
//! * [`SpinMutex`]: a non-reentrant mutual-exclusion lock over a raw spin
//!   lock. Object caches and address-space interval trees each live behind
//!   one of these.
//! * [`WaitChannel`]: the condition variable paired with a lock. A waiter
//!   takes a [`WaitTicket`] while it still observes the unsatisfied condition,
//!   drops the lock, and sleeps until a waker advances the channel. After
//!   waking it re-acquires the lock and re-checks; a wakeup is a hint, never
//!   a guarantee.
//!
//! [`SyncOnceCell`] covers write-once state such as the translation root of
//! an address space that is initialized in place.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod mutex;
mod raw_spin;
mod sync_once_cell;
mod wait_channel;

pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;
pub use sync_once_cell::SyncOnceCell;
pub use wait_channel::{WaitChannel, WaitTicket};

pub type SpinMutex<T> = Mutex<T, RawSpin>;
pub type SpinMutexGuard<'a, T> = MutexGuard<'a, T, RawSpin>;

impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }
}

pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
    fn raw_is_locked(&self) -> bool;
}

pub trait RawUnlock {
    unsafe fn raw_unlock(&self);
}
