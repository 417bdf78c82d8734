use crate::{Mutex, MutexGuard, RawLock, RawUnlock};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Snapshot of a [`WaitChannel`] generation.
///
/// A sleeper takes the ticket while it still holds the lock that protects
/// the condition it is waiting for; any wakeup issued after that point
/// releases it, so no wakeup is lost between "observe" and "sleep".
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub struct WaitTicket(u64);

/// Sleep/wakeup rendezvous paired with a lock.
///
/// Wakers bump a generation counter; sleepers wait for it to move past the
/// ticket they took. Every wakeup is broadcast. Sleepers must re-check their
/// condition after waking.
///
/// ```
/// use kernel_sync::{SpinMutex, WaitChannel};
///
/// let ready = SpinMutex::new(true);
/// let channel = WaitChannel::new();
///
/// let mut guard = ready.lock();
/// while !*guard {
///     guard = channel.sleep(guard);
/// }
/// ```
pub struct WaitChannel {
    generation: AtomicU64,
    sleepers: AtomicUsize,
}

impl Default for WaitChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitChannel {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            sleepers: AtomicUsize::new(0),
        }
    }

    /// Captures the current generation.
    #[inline]
    pub fn ticket(&self) -> WaitTicket {
        WaitTicket(self.generation.load(Ordering::Acquire))
    }

    /// Blocks until a wakeup newer than `ticket` has been issued.
    ///
    /// Returns immediately if that already happened.
    pub fn wait(&self, ticket: WaitTicket) {
        self.sleepers.fetch_add(1, Ordering::AcqRel);
        while self.generation.load(Ordering::Acquire) == ticket.0 {
            spin_loop();
        }
        self.sleepers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Releases `guard`, sleeps until the next wakeup and re-acquires the lock.
    pub fn sleep<'a, T, R>(&self, guard: MutexGuard<'a, T, R>) -> MutexGuard<'a, T, R>
    where
        R: RawLock + RawUnlock,
    {
        let ticket = self.ticket();
        self.sleep_from(ticket, guard)
    }

    /// Like [`sleep`](Self::sleep), with a ticket taken earlier.
    ///
    /// Used when the condition was observed before `guard` was taken, e.g. a
    /// failed frame allocation performed under an unrelated lock.
    pub fn sleep_from<'a, T, R>(
        &self,
        ticket: WaitTicket,
        guard: MutexGuard<'a, T, R>,
    ) -> MutexGuard<'a, T, R>
    where
        R: RawLock + RawUnlock,
    {
        let mutex: &'a Mutex<T, R> = MutexGuard::unlock(guard);
        self.wait(ticket);
        mutex.lock()
    }

    /// Wakes every current sleeper.
    #[inline]
    pub fn wake_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of threads currently blocked in [`wait`](Self::wait).
    #[inline]
    #[must_use]
    pub fn sleepers(&self) -> usize {
        self.sleepers.load(Ordering::Acquire)
    }
}
