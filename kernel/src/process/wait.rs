//! Process Wait Infrastructure
//!
//! Provides `waitpid`-style semantics for parent processes to wait on
//! children. There is no per-process blocking wake-up wired into the
//! scheduler, so a blocking wait polls: it repeatedly sleeps a short
//! interval and rechecks child state.

use super::{pcb::ProcessState, ProcessId};
use crate::error::KernelError;

/// Poll interval while blocked in `waitpid`, in nanoseconds.
const WAIT_POLL_NS: u64 = 1_000_000;

// ---------------------------------------------------------------------------
// Wait Options
// ---------------------------------------------------------------------------

/// Options controlling `waitpid` behavior, modeled after the POSIX flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitOptions {
    flags: u32,
}

impl WaitOptions {
    /// Do not block if no child has exited yet.
    pub const WNOHANG: u32 = 1;

    /// Create options from raw flags.
    pub fn from_flags(flags: u32) -> Self {
        Self { flags }
    }

    /// Check whether WNOHANG is set.
    pub fn is_nohang(&self) -> bool {
        self.flags & Self::WNOHANG != 0
    }
}

// ---------------------------------------------------------------------------
// Wait Status
// ---------------------------------------------------------------------------

/// Status returned by `waitpid` describing how a child changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Child exited normally with the given status code.
    Exited(i32),
}

impl WaitStatus {
    /// Encode the status as a raw `i32` matching the POSIX `wstatus` layout:
    /// `(code & 0xFF) << 8`.
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Exited(code) => (code & 0xFF) << 8,
        }
    }
}

// ---------------------------------------------------------------------------
// System Call: waitpid
// ---------------------------------------------------------------------------

/// Wait for a child process to exit.
///
/// # Arguments
/// * `pid` - Process to wait for:
///   - `pid > 0`: wait for the specific child with that PID.
///   - `pid <= 0`: wait for any child.
/// * `options` - [`WaitOptions`] controlling blocking.
///
/// # Returns
/// A tuple of `(child_pid, status)` on success.
#[cfg(feature = "alloc")]
pub fn sys_waitpid(pid: i64, options: WaitOptions) -> Result<(ProcessId, WaitStatus), KernelError> {
    let current = super::current_process().ok_or(KernelError::NotInitialized {
        subsystem: "current process",
    })?;
    let parent_pid = current.pid;

    let target: Option<ProcessId> = if pid > 0 {
        Some(ProcessId(pid as u64))
    } else {
        None
    };

    loop {
        let children = super::table::find_children(parent_pid);

        if children.is_empty() {
            return Err(KernelError::NotFound {
                resource: "child process",
                id: 0,
            });
        }

        let mut target_exists = false;

        for child_pid in &children {
            if let Some(target_pid) = target {
                if *child_pid != target_pid {
                    continue;
                }
            }
            target_exists = true;

            if let Some(child) = super::table::get_process(*child_pid) {
                if child.get_state() == ProcessState::Zombie {
                    let exit_code = child.get_exit_code();
                    collect_zombie(*child_pid, parent_pid)?;
                    return Ok((*child_pid, WaitStatus::Exited(exit_code)));
                }
            }
        }

        if let Some(target_pid) = target {
            if !target_exists {
                return Err(KernelError::ProcessNotFound { pid: target_pid.0 });
            }
        }

        if options.is_nohang() {
            return Err(KernelError::WouldBlock);
        }

        crate::sched::sleep(WAIT_POLL_NS);
    }
}

// ---------------------------------------------------------------------------
// Zombie Collection
// ---------------------------------------------------------------------------

/// Clean up a zombie process after a successful wait.
///
/// Removes the child from the parent's children list and from the global
/// process table.
#[cfg(feature = "alloc")]
pub fn collect_zombie(child_pid: ProcessId, parent_pid: ProcessId) -> Result<(), KernelError> {
    if let Some(parent) = super::table::get_process(parent_pid) {
        parent.children.lock().retain(|&p| p != child_pid);
    }

    super::table::remove_process(child_pid);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_options_default() {
        let opts = WaitOptions::default();
        assert!(!opts.is_nohang());
    }

    #[test]
    fn test_wait_options_nohang() {
        let opts = WaitOptions::from_flags(WaitOptions::WNOHANG);
        assert!(opts.is_nohang());
    }

    #[test]
    fn test_wait_status_exited() {
        let status = WaitStatus::Exited(42);
        assert_eq!(status, WaitStatus::Exited(42));
        assert_eq!(status.to_raw(), 42 << 8);
    }

    #[test]
    fn test_wait_status_equality() {
        assert_eq!(WaitStatus::Exited(0), WaitStatus::Exited(0));
        assert_ne!(WaitStatus::Exited(0), WaitStatus::Exited(1));
    }
}
