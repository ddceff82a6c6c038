//! Process exit and cleanup
//!
//! Handles process termination, resource cleanup, and zombie hand-off to
//! the parent. The exiting thread itself is retired through
//! [`crate::sched::exit_current`]; this module only tears down the
//! process-level state around it (address space, open files, children).

#[cfg(feature = "alloc")]
extern crate alloc;

use core::sync::atomic::Ordering;

use super::{
    pcb::{Process, ProcessState},
    table, ProcessId,
};
use crate::println;

/// Exit the current process with `exit_code`.
///
/// Tears down process resources, marks the process a zombie for its parent
/// to reap, then retires the calling thread. Never returns.
pub fn exit_process(exit_code: i32) -> ! {
    if let Some(process) = super::current_process() {
        println!(
            "[PROCESS] process {} exiting with code {}",
            process.pid.0, exit_code
        );

        process.set_exit_code(exit_code);
        cleanup_process(&process);
        process.set_state(ProcessState::Zombie);

        if let Some(parent_pid) = process.parent {
            if let Some(parent) = table::get_process(parent_pid) {
                if parent.get_state() == ProcessState::Blocked {
                    parent.set_state(ProcessState::Ready);
                }
            }
        }
    }

    crate::sched::exit_current()
}

/// Release everything a process owns except its table entry, which stays
/// around (as a zombie) until the parent reaps it.
pub(super) fn cleanup_process(process: &Process) {
    process.destroy_address_space();

    #[cfg(feature = "alloc")]
    process.file_table.lock().close_all();

    let _cpu_time = process.cpu_time.load(Ordering::Relaxed);
    println!(
        "[PROCESS] process {} used {} microseconds of CPU time",
        process.pid.0, _cpu_time
    );
}

// ============================================================================
// Process Statistics
// ============================================================================

/// Process statistics
#[cfg(feature = "alloc")]
pub struct ProcessStats {
    pub total_processes: usize,
    pub running_processes: usize,
    pub blocked_processes: usize,
    pub zombie_processes: usize,
    pub total_threads: usize,
    pub total_cpu_time: u64,
}

/// Get system-wide process statistics
#[cfg(feature = "alloc")]
pub fn get_process_stats() -> ProcessStats {
    let mut stats = ProcessStats {
        total_processes: 0,
        running_processes: 0,
        blocked_processes: 0,
        zombie_processes: 0,
        total_threads: 0,
        total_cpu_time: 0,
    };

    table::for_each(|process| {
        stats.total_processes += 1;
        stats.total_threads += process.thread_count();
        stats.total_cpu_time += process.get_cpu_time();

        match process.get_state() {
            ProcessState::Running => stats.running_processes += 1,
            ProcessState::Blocked => stats.blocked_processes += 1,
            ProcessState::Zombie => stats.zombie_processes += 1,
            _ => {}
        }
    });

    stats
}
