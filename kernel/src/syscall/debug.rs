//! Debug, TCB, and framebuffer system calls: debug, set_tcb, fetch_framebuffer.

use super::{userspace, SyscallError, SyscallResult};

/// Longest single `debug()` write accepted in one call.
const MAX_DEBUG_LEN: usize = 4096;

/// `debug(str, len)` (syscall 1). Copies a user byte buffer and writes it to
/// the serial console; handy for early userspace bring-up before a real log
/// exists.
pub fn sys_debug(str_ptr: usize, len: usize) -> SyscallResult {
    if len > MAX_DEBUG_LEN {
        return Err(SyscallError::InvalidArgument);
    }
    userspace::validate_user_buffer(str_ptr, len)?;

    // SAFETY: validated above to be a readable user-space range of `len` bytes.
    let bytes = unsafe { core::slice::from_raw_parts(str_ptr as *const u8, len) };
    let text = core::str::from_utf8(bytes).map_err(|_| SyscallError::InvalidArgument)?;

    crate::print!("{}", text);
    Ok(len)
}

/// `set_tcb(ptr)` (syscall 2). Sets the calling thread's `fs` base, the
/// architectural anchor for userspace thread-local storage.
#[cfg(feature = "alloc")]
pub fn sys_set_tcb(ptr: usize) -> SyscallResult {
    crate::process::current_thread().set_fs_base(ptr as u64);
    Ok(0)
}

#[cfg(not(feature = "alloc"))]
pub fn sys_set_tcb(_ptr: usize) -> SyscallResult {
    Err(SyscallError::NotSupported)
}

/// `fetch_framebuffer(out)` (syscall 10). This build's boot path never
/// records a framebuffer from `BootInfo` (the console is serial-only, see
/// `print.rs`), so there is nothing to map into the caller's address space
/// or copy out.
pub fn sys_fetch_framebuffer(_out: usize) -> SyscallResult {
    Err(SyscallError::NotSupported)
}
