//! FIFO ready queue (spec §4.5: single ready queue per CPU, no migration).
//!
//! This build brings up only the boot CPU, so there is exactly one queue
//! rather than one per core — mirrors the single event queue in
//! [`crate::timer`].

use alloc::collections::VecDeque;

use super::ThreadHandle;
use crate::sync::Spinlock;

/// Round-robin ready queue. Threads are appended at the back by
/// [`super::schedule_thread`] and popped from the front by the scheduler
/// when picking the next thread to run.
pub struct ReadyQueue {
    threads: Spinlock<VecDeque<ThreadHandle>>,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            threads: Spinlock::new(VecDeque::new()),
        }
    }

    pub fn push_back(&self, thread: ThreadHandle) {
        self.threads.lock().push_back(thread);
    }

    pub fn pop_front(&self) -> Option<ThreadHandle> {
        self.threads.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}
