//! Process management
//!
//! Owns the process control block, the global process table, creation/exec/
//! fork/exit/wait, and the per-process current-working-directory state.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "alloc")]
extern crate alloc;

use crate::println;

pub mod creation;
pub mod cwd;
pub mod exit;
pub mod fork;
pub mod pcb;
pub mod table;
pub mod wait;

pub use creation::{
    create_process, create_process_with_options, exec_process, spawn_init, ProcessCreateOptions,
};
pub use exit::exit_process;
pub use fork::fork_process;
pub use pcb::{Process, ProcessId, ProcessPriority, ProcessState};
pub use table::get_process;
pub use wait::sys_waitpid;

/// Maximum number of processes
pub const MAX_PROCESSES: usize = 4096;

/// Process ID allocator
static NEXT_PID: AtomicU64 = AtomicU64::new(1);

/// Allocate a new process ID
pub fn alloc_pid() -> ProcessId {
    ProcessId(NEXT_PID.fetch_add(1, Ordering::Relaxed))
}

/// Initialize process management: the process table, then the init process
/// (PID 1).
pub fn init() {
    println!("[PROCESS] Initializing process management...");

    table::init();

    #[cfg(feature = "alloc")]
    {
        use alloc::string::String;
        match creation::create_process(String::from("init"), 0) {
            Ok(pid) => println!("[PROCESS] Created init process with PID {}", pid.0),
            Err(e) => panic!("[PROCESS] Failed to create init process: {}", e),
        }
    }

    println!("[PROCESS] Process management initialized");
}

/// The process owning the thread currently running on this CPU.
#[cfg(feature = "alloc")]
pub fn current_process() -> Option<alloc::sync::Arc<Process>> {
    crate::sched::current_thread_handle().owning_process()
}

/// The `ThreadHandle` currently running on this CPU.
pub fn current_thread() -> crate::sched::ThreadHandle {
    crate::sched::current_thread_handle()
}

/// Yield the current thread back to the scheduler.
pub fn yield_thread() {
    crate::sched::yield_now(crate::sched::ThreadStatus::Ready);
}
