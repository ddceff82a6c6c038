//! System call interface
//!
//! Dispatches the 27 syscalls user space can make (§4.12 of the ABI this
//! kernel exposes) and carries each one's result back across the
//! user/kernel boundary as a `{value, error}` pair in `rax:rdx` -- `error`
//! is a negative POSIX errno, or zero on success.

#![allow(dead_code)]

use crate::{arch::x86_64::syscall::SyscallFrame, error::KernelError};

mod debug;
mod filesystem;
mod memory;
mod process;
mod time;
mod userspace;

pub use userspace::{
    copy_from_user, copy_string_array_from_user, copy_string_from_user, copy_to_user,
    validate_user_buffer, validate_user_ptr, validate_user_ptr_typed,
};

/// Result type every `sys_*` handler returns.
pub type SyscallResult = Result<usize, SyscallError>;

/// Syscall-layer error. Deeper kernel failures arrive wrapped in
/// [`SyscallError::Kernel`], carrying the negative errno [`KernelError::to_errno`]
/// already computed; validation failures local to the syscall boundary
/// (bad pointers, malformed arguments) use the other variants directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall,
    InvalidArgument,
    InvalidPointer,
    InvalidState,
    BadFd,
    OutOfMemory,
    PermissionDenied,
    ResourceNotFound,
    WouldBlock,
    NotSupported,
    NameTooLong,
    NotATty,
    /// Already-mapped negative errno from a deeper `KernelError`.
    Kernel(i32),
}

impl SyscallError {
    /// Negative POSIX errno to return in `rdx`.
    pub fn errno(self) -> i32 {
        use crate::error::*;
        match self {
            Self::InvalidSyscall => -ENOSYS,
            Self::InvalidArgument => -EINVAL,
            Self::InvalidPointer => -EFAULT,
            Self::InvalidState => -EINVAL,
            Self::BadFd => -EBADF,
            Self::OutOfMemory => -ENOMEM,
            Self::PermissionDenied => -EPERM,
            Self::ResourceNotFound => -ENOENT,
            Self::WouldBlock => -EAGAIN_SYSCALL,
            Self::NotSupported => -ENOSYS,
            Self::NameTooLong => -ENAMETOOLONG,
            Self::NotATty => -ENOTTY,
            Self::Kernel(errno) => errno,
        }
    }
}

/// `error.rs` keeps `EAGAIN` private (only used internally by
/// `KernelError::to_errno`); the syscall layer needs its own copy for
/// `WouldBlock`.
const EAGAIN_SYSCALL: i32 = 11;

impl From<KernelError> for SyscallError {
    fn from(err: KernelError) -> Self {
        Self::Kernel(err.to_errno())
    }
}

/// The two-register return convention every syscall uses: `value` in `rax`,
/// `error` in `rdx`. A `#[repr(C)] struct` of two integer fields is returned
/// across those exact two registers under the SysV ABI, so no manual
/// register juggling is needed at the call site in `syscall_entry`.
#[repr(C)]
pub struct SyscallReturn {
    pub value: usize,
    pub error: i32,
}

impl SyscallReturn {
    fn ok(value: usize) -> Self {
        Self { value, error: 0 }
    }

    fn err(e: SyscallError) -> Self {
        Self {
            value: 0,
            error: e.errno(),
        }
    }
}

/// System call entry point, reached from [`crate::arch::x86_64::syscall::syscall_entry`]
/// with `frame` pointing at the raw register frame pushed at entry.
#[no_mangle]
pub extern "C" fn syscall_handler(frame: *const SyscallFrame) -> SyscallReturn {
    // SAFETY: `frame` is the stack address `syscall_entry` just pushed the
    // register frame to; it is valid for the duration of this call.
    let frame = unsafe { &*frame };

    let num = frame.rax as usize;
    let a1 = frame.rdi as usize;
    let a2 = frame.rsi as usize;
    let a3 = frame.rdx as usize;
    let a4 = frame.r10 as usize;
    let a5 = frame.r8 as usize;
    let a6 = frame.r9 as usize;

    match dispatch(num, a1, a2, a3, a4, a5, a6) {
        Ok(value) => SyscallReturn::ok(value),
        Err(e) => SyscallReturn::err(e),
    }
}

/// The 27-entry syscall table.
#[allow(clippy::too_many_arguments)]
fn dispatch(
    num: usize,
    a1: usize,
    a2: usize,
    a3: usize,
    a4: usize,
    a5: usize,
    a6: usize,
) -> SyscallResult {
    match num {
        0 => process::sys_exit(a1 as i32, a2 != 0),
        1 => debug::sys_debug(a1, a2),
        2 => debug::sys_set_tcb(a1),
        3 => memory::sys_anon_alloc(a1),
        4 => memory::sys_anon_free(a1, a2),
        5 => filesystem::sys_open(a1, a2, a3),
        6 => filesystem::sys_close(a1),
        7 => filesystem::sys_read(a1, a2, a3),
        8 => filesystem::sys_write(a1, a2, a3),
        9 => filesystem::sys_seek(a1, a2 as isize, a3),
        10 => debug::sys_fetch_framebuffer(a1),
        11 => process::sys_fork(),
        12 => process::sys_execve(a1, a2, a3),
        13 => memory::sys_mmap(a1, a2, a3, a4, a5, a6),
        14 => memory::sys_mprotect(a1, a2, a3),
        15 => filesystem::sys_mkdir(a1, a2),
        16 => filesystem::sys_dup2(a1, a2),
        17 => time::sys_gettime(a1, a2),
        18 => time::sys_nsleep(a1),
        19 => process::sys_getpid(),
        20 => filesystem::sys_getcwd(a1, a2),
        21 => filesystem::sys_isatty(a1),
        22 => process::sys_getppid(),
        23 => filesystem::sys_ioctl(a1, a2, a3),
        24 => filesystem::sys_fcntl(a1, a2, a3),
        25 => filesystem::sys_stat(a1, a2),
        26 => filesystem::sys_dup(a1),
        _ => Err(SyscallError::InvalidSyscall),
    }
}
