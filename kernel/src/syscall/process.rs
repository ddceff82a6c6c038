//! Process system calls: fork, execve, exit, getpid, getppid.

#[cfg(feature = "alloc")]
extern crate alloc;

use super::{userspace, SyscallError, SyscallResult};
use crate::process;

/// `exit(code, panicked)` (syscall 0). Never returns.
pub fn sys_exit(code: i32, _panicked: bool) -> SyscallResult {
    process::exit_process(code)
}

/// `fork()` (syscall 11). Returns the child's PID to the parent; the child
/// thread resumes in the same place via its snapshotted syscall frame, with
/// `rax` set to 0 by that snapshot rather than by this handler.
#[cfg(feature = "alloc")]
pub fn sys_fork() -> SyscallResult {
    let pid = process::fork_process()?;
    Ok(pid.0 as usize)
}

#[cfg(not(feature = "alloc"))]
pub fn sys_fork() -> SyscallResult {
    Err(SyscallError::NotSupported)
}

/// `execve(path, argv, envp)` (syscall 12). Never returns on success;
/// returns an error if the image could not be loaded.
#[cfg(feature = "alloc")]
pub fn sys_execve(path_ptr: usize, argv_ptr: usize, envp_ptr: usize) -> SyscallResult {
    // SAFETY: pointers are validated by the copy helpers before any read.
    let path = unsafe { userspace::copy_string_from_user(path_ptr)? };
    let argv = unsafe { userspace::copy_string_array_from_user(argv_ptr)? };
    let envp = unsafe { userspace::copy_string_array_from_user(envp_ptr)? };

    let argv_refs: alloc::vec::Vec<&str> =
        argv.iter().map(alloc::string::String::as_str).collect();
    let envp_refs: alloc::vec::Vec<&str> =
        envp.iter().map(alloc::string::String::as_str).collect();

    process::exec_process(&path, &argv_refs, &envp_refs)
}

#[cfg(not(feature = "alloc"))]
pub fn sys_execve(_path_ptr: usize, _argv_ptr: usize, _envp_ptr: usize) -> SyscallResult {
    Err(SyscallError::NotSupported)
}

/// `getpid()` (syscall 19).
#[cfg(feature = "alloc")]
pub fn sys_getpid() -> SyscallResult {
    let proc = process::current_process().ok_or(SyscallError::InvalidState)?;
    Ok(proc.pid.0 as usize)
}

#[cfg(not(feature = "alloc"))]
pub fn sys_getpid() -> SyscallResult {
    Err(SyscallError::NotSupported)
}

/// `getppid()` (syscall 22).
#[cfg(feature = "alloc")]
pub fn sys_getppid() -> SyscallResult {
    let proc = process::current_process().ok_or(SyscallError::InvalidState)?;
    Ok(proc.parent.map(|p| p.0).unwrap_or(0) as usize)
}

#[cfg(not(feature = "alloc"))]
pub fn sys_getppid() -> SyscallResult {
    Err(SyscallError::NotSupported)
}
