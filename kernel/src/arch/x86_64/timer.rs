//! Low-level timer access: a monotonic tick counter plus one-shot local APIC
//! timer control. The per-CPU deadline queue in [`crate::timer`] is the only
//! caller that reprograms the hardware; this module just knows how.

use core::sync::atomic::{AtomicU64, Ordering};

/// IDT vector the local APIC timer is wired to (see `idt.rs`).
pub const TIMER_VECTOR: u8 = 32;

/// Divide-by-16; arbitrary but matches the teacher's original periodic setup.
const TIMER_DIVIDE: u8 = 0x03;

/// Incremented once per timer interrupt. Backs `CLOCK_MONOTONIC` (spec §4.12,
/// Open Question (b)) since there is no wall-clock source wired up.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Called once from the timer interrupt handler on every fire.
pub fn tick() -> u64 {
    TICKS.fetch_add(1, Ordering::Relaxed) + 1
}

/// Current tick count, advanced once per timer interrupt.
pub fn get_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Arm the local APIC timer for a single interrupt `count` cycles from now.
/// `count` of 0 disarms instead.
pub fn arm_oneshot(count: u32) {
    if count == 0 {
        disarm();
        return;
    }
    let _ = super::apic::setup_timer_oneshot(TIMER_VECTOR, TIMER_DIVIDE, count);
}

pub fn disarm() {
    let _ = super::apic::stop_timer();
}
