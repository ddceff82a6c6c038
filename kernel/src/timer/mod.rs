//! Per-CPU deadline-ordered event queue (spec §4.4).
//!
//! Backs both thread sleep and scheduler preemption: `event_add` inserts a
//! callback to run at an absolute deadline and, if it becomes the new head,
//! reprograms the local APIC timer for a one-shot fire at `deadline - now`.
//! The timer interrupt handler drains every expired entry at the head before
//! reprogramming for whatever is left.
//!
//! This build only brings up the boot CPU, so there is a single queue rather
//! than one per `seq_id` — the API is already per-CPU-shaped (`cpu` arguments
//! throughout) so adding AP queues later is additive, not a rewrite.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch;
use crate::sync::Spinlock;

/// Called from the timer interrupt with the event's `callback_arg`.
pub type EventCallback = fn(usize);

struct Event {
    id: u64,
    deadline_ns: u64,
    callback: EventCallback,
    callback_arg: usize,
}

struct CpuQueue {
    events: Vec<Event>,
}

impl CpuQueue {
    const fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Insert keeping the list sorted by deadline, FIFO among ties (spec
    /// §4.4 "Ordering").
    fn insert(&mut self, event: Event) {
        let pos = self
            .events
            .iter()
            .position(|e| e.deadline_ns > event.deadline_ns)
            .unwrap_or(self.events.len());
        self.events.insert(pos, event);
    }

    fn remove(&mut self, id: u64) -> Option<Event> {
        let pos = self.events.iter().position(|e| e.id == id)?;
        Some(self.events.remove(pos))
    }
}

static QUEUE: Spinlock<CpuQueue> = Spinlock::new(CpuQueue::new());
static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle returned by [`event_add`]; pass to [`event_cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventId(u64);

/// Approximate APIC counts per nanosecond post divide-by-16.
///
/// TODO: calibrate against a known time source (PIT channel 2 or the
/// `BootInfo`-provided TSC frequency) instead of assuming ~1us granularity.
const COUNTS_PER_NS: u64 = 1;
const NS_PER_COUNT_SHIFT: u32 = 10; // ns -> counts: divide by ~1024 (~1us granularity)

fn ns_to_counts(ns: u64) -> u32 {
    ((ns >> NS_PER_COUNT_SHIFT) * COUNTS_PER_NS).clamp(1, u32::MAX as u64) as u32
}

/// Monotonic time since boot, in nanoseconds, derived from the tick counter.
/// Backs `CLOCK_MONOTONIC` (spec §4.12 syscall 17, Open Question (b)).
pub fn now_ns() -> u64 {
    arch::timer::get_ticks() << NS_PER_COUNT_SHIFT
}

/// Insert an event to fire at `deadline_ns` (absolute, see [`now_ns`]).
/// Interrupts are masked for the duration via the queue's spinlock.
pub fn event_add(deadline_ns: u64, callback: EventCallback, callback_arg: usize) -> EventId {
    let id = NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed);
    let mut queue = QUEUE.lock();
    queue.insert(Event {
        id,
        deadline_ns,
        callback,
        callback_arg,
    });
    if queue.events.first().map(|e| e.id) == Some(id) {
        arm_head(&queue);
    }
    EventId(id)
}

/// Remove a previously-added event. Idempotent: a no-op if already fired.
pub fn event_cancel(event: EventId) {
    let mut queue = QUEUE.lock();
    let was_head = queue.events.first().map(|e| e.id) == Some(event.0);
    if queue.remove(event.0).is_some() && was_head {
        arm_head(&queue);
    }
}

fn arm_head(queue: &CpuQueue) {
    match queue.events.first() {
        Some(head) => {
            let now = now_ns();
            let delta = head.deadline_ns.saturating_sub(now);
            arch::timer::arm_oneshot(ns_to_counts(delta.max(1)));
        }
        None => arch::timer::disarm(),
    }
}

/// Timer interrupt entry point: advance the tick counter, drain every
/// expired event at the head, then reprogram for whatever head remains.
/// Runs with interrupts masked (spec §4.4 "All handler work runs with
/// interrupts masked").
pub fn on_tick() {
    arch::timer::tick();
    let now = now_ns();
    loop {
        let expired = {
            let mut queue = QUEUE.lock();
            match queue.events.first() {
                Some(e) if e.deadline_ns <= now => queue.remove(e.id),
                _ => None,
            }
        };
        match expired {
            Some(event) => (event.callback)(event.callback_arg),
            None => break,
        }
    }
    let queue = QUEUE.lock();
    arm_head(&queue);
}

/// Number of events still armed. Exposed for tests.
pub fn pending_event_count() -> usize {
    QUEUE.lock().events.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: usize) {}

    #[test]
    fn fifo_within_equal_deadline() {
        let a = event_add(100, noop, 1);
        let b = event_add(100, noop, 2);
        {
            let q = QUEUE.lock();
            assert_eq!(q.events[0].id, a.0);
            assert_eq!(q.events[1].id, b.0);
        }
        event_cancel(a);
        event_cancel(b);
    }

    #[test]
    fn cancel_is_idempotent() {
        let a = event_add(50, noop, 0);
        event_cancel(a);
        event_cancel(a);
        assert_eq!(pending_event_count(), 0);
    }
}
