//! Scheduler-integrated blocking mutex.
//!
//! Three-state `{Unlocked, Locked, Contested}` design matching the FIFO
//! wait-queue mutex described in the kernel's concurrency model: a fast CAS
//! path for the uncontended case, and a slow path that parks the calling
//! thread on the mutex's own wait queue under a short-held inner spinlock.
//! Unlike [`super::spinlock::Spinlock`], a `Mutex` guard may be held across a
//! `yield`.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU8, Ordering};

use alloc::collections::VecDeque;

use super::spinlock::Spinlock;
use crate::sched::{self, ThreadHandle};

const UNLOCKED: u8 = 0;
const LOCKED: u8 = 1;
const CONTESTED: u8 = 2;

/// A blocking mutex integrated with the scheduler's wait/wake primitives.
pub struct Mutex<T: ?Sized> {
    state: AtomicU8,
    /// Guards the wait queue only; never held across a yield.
    wait_queue: Spinlock<VecDeque<ThreadHandle>>,
    inner: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicU8::new(UNLOCKED),
            wait_queue: Spinlock::new(VecDeque::new()),
            inner: UnsafeCell::new(value),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    fn try_lock_fast(&self) -> bool {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Acquire the mutex, blocking the current thread if it is contended.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        if self.try_lock_fast() {
            return MutexGuard { mutex: self };
        }

        loop {
            let mut queue = self.wait_queue.lock();
            let prev = self.state.swap(CONTESTED, Ordering::AcqRel);

            if prev == UNLOCKED {
                self.state.store(LOCKED, Ordering::Release);
                drop(queue);
                return MutexGuard { mutex: self };
            }

            // Someone already owns it (Locked or Contested): park here.
            queue.push_back(sched::current_thread_handle());
            drop(queue);
            sched::yield_now(sched::ThreadStatus::Blocked);
            // Woken up by `unlock`'s pop; try the fast path again in case
            // of spurious wakeups or a race with a concurrent unlock.
            if self.try_lock_fast() {
                return MutexGuard { mutex: self };
            }
        }
    }

    /// Try to acquire without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.try_lock_fast() {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    fn unlock(&self) {
        if self
            .state
            .compare_exchange(LOCKED, UNLOCKED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }

        let mut queue = self.wait_queue.lock();
        debug_assert_eq!(self.state.load(Ordering::Relaxed), CONTESTED);

        if let Some(waiter) = queue.pop_front() {
            sched::schedule_thread(waiter);
        }

        if queue.is_empty() {
            // The thread we just woke becomes the new owner once it resumes
            // and observes LOCKED (not UNLOCKED, so nobody else can sneak in
            // on the fast path while it's on its way back to running).
            self.state.store(LOCKED, Ordering::Release);
        }
    }
}

/// RAII guard for a locked [`Mutex`].
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.inner.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.inner.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
