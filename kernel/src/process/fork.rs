//! Process forking (copy-on-write)
//!
//! Implements the fork system call, which creates a child process as a
//! copy of the current one. Currently a full address-space copy;
//! copy-on-write is a possible future optimization, not required by any
//! module this build implements.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::format;

use super::{
    pcb::{ProcessBuilder, ProcessState},
    table, ProcessId,
};
use crate::error::KernelError;

/// Fork the current process, returning the child's PID to the parent.
///
/// The child is a new process with its own (deep-copied) address space,
/// inherited file table and environment, and a single thread that resumes
/// exactly where the parent's `fork()` call left off, seeing a return
/// value of `0`.
#[cfg(feature = "alloc")]
pub fn fork_process() -> Result<ProcessId, KernelError> {
    let current = super::current_process().ok_or(KernelError::ProcessNotFound { pid: 0 })?;

    let frame = crate::arch::x86_64::syscall::current_syscall_frame().ok_or(KernelError::InvalidState {
        expected: "fork called from syscall context",
        actual: "no syscall frame",
    })?;
    let user_sp = crate::arch::x86_64::syscall::get_saved_user_rsp();

    let new_process = ProcessBuilder::new(format!("{}-fork", current.name))
        .parent(current.pid)
        .priority(*current.priority.lock())
        .uid(current.uid)
        .gid(current.gid)
        .build()?;

    let new_pid = new_process.pid;

    let child_vas = current.address_space().fork()?;
    new_process.replace_address_space(child_vas);

    {
        let parent_ft = current.file_table.lock();
        *new_process.file_table.lock() = parent_ft.clone_for_fork();
    }

    {
        let parent_env = current.env_vars.lock();
        let mut child_env = new_process.env_vars.lock();
        for (key, value) in parent_env.iter() {
            child_env.insert(key.clone(), value.clone());
        }
    }

    {
        let parent_cwd = current.cwd.lock();
        if let Ok(child_cwd) = super::cwd::ProcessCwd::with_path(parent_cwd.get()) {
            *new_process.cwd.lock() = child_cwd;
        }
    }

    {
        use core::sync::atomic::Ordering;
        new_process
            .pgid
            .store(current.pgid.load(Ordering::Acquire), Ordering::Release);
        new_process
            .sid
            .store(current.sid.load(Ordering::Acquire), Ordering::Release);
    }

    let child_thread =
        crate::sched::Thread::new_fork(format!("{}-fork", current.name), frame, user_sp);
    child_thread.bind_process(new_process.clone());
    new_process.add_thread(child_thread.clone());

    current.children.lock().push(new_pid);

    table::add_process(new_process.clone());
    new_process.set_state(ProcessState::Ready);
    crate::sched::schedule_thread(child_thread);

    Ok(new_pid)
}
