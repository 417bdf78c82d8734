use crate::{RawLock, RawUnlock};
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

/// Mutual exclusion over `T`, parameterized by the raw lock `R`.
///
/// Not reentrant: locking twice from the same thread deadlocks.
pub struct Mutex<T, R> {
    raw: R,
    cell: UnsafeCell<T>,
    _no_send_sync: PhantomData<*mut ()>, // !Send/!Sync by default; we implement below
}

unsafe impl<T: Send, R: Sync> Sync for Mutex<T, R> {}
unsafe impl<T: Send, R: Send> Send for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    pub const fn from_raw(raw: R, value: T) -> Self {
        Self {
            raw,
            cell: UnsafeCell::new(value),
            _no_send_sync: PhantomData,
        }
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.cell.get_mut()
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.cell.into_inner()
    }
}

/// RAII guard; the lock is released when the guard goes out of scope.
pub struct MutexGuard<'a, T, R>
where
    R: RawUnlock,
{
    m: &'a Mutex<T, R>,
}

impl<'a, T, R> MutexGuard<'a, T, R>
where
    R: RawUnlock,
{
    /// Releases the lock and hands back the mutex it guarded.
    ///
    /// Used by sleepers that have to drop a lock before blocking and take
    /// it again afterwards.
    #[inline]
    pub fn unlock(guard: Self) -> &'a Mutex<T, R> {
        let m = guard.m;
        drop(guard);
        m
    }
}

impl<T, R> Deref for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.m.cell.get() }
    }
}

impl<T, R> DerefMut for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.m.cell.get() }
    }
}

impl<T, R> Drop for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn drop(&mut self) {
        unsafe { self.m.raw.raw_unlock() }
    }
}

impl<T, R> Mutex<T, R>
where
    R: RawLock + RawUnlock,
{
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        self.raw.raw_lock();
        MutexGuard { m: self }
    }

    /// Acquires the lock only if it is free right now.
    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, R>> {
        if self.raw.raw_try_lock() {
            Some(MutexGuard { m: self })
        } else {
            None
        }
    }

    /// Snapshot of the lock state; stale as soon as it returns.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.raw_is_locked()
    }

    /// Closure convenience, built on the guard.
    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut g = self.lock();
        f(&mut g)
    }
}

impl<T: Default, R: Default> Default for Mutex<T, R> {
    fn default() -> Self {
        Self::from_raw(R::default(), T::default())
    }
}

impl<T, R> fmt::Debug for Mutex<T, R>
where
    R: RawLock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.raw.raw_is_locked())
            .finish_non_exhaustive()
    }
}
