//! Memory system calls: anon_alloc/anon_free, mmap/mprotect.
//!
//! `mmap` only ever creates anonymous mappings -- there is no file-backed
//! path in this ABI, unlike POSIX `mmap(2)`.

#[cfg(feature = "alloc")]
extern crate alloc;

use super::{userspace::validate_user_buffer, SyscallError, SyscallResult};
use crate::{
    mm::{Caching, MapFlags, Protection},
    process,
};

/// No access allowed.
pub const PROT_NONE: usize = 0x0;
/// Pages may be read.
pub const PROT_READ: usize = 0x1;
/// Pages may be written.
pub const PROT_WRITE: usize = 0x2;
/// Pages may be executed.
pub const PROT_EXEC: usize = 0x4;

/// Place the mapping at exactly the requested address.
pub const MAP_FIXED: usize = 0x10;

fn current() -> Result<alloc::sync::Arc<process::Process>, SyscallError> {
    process::current_process().ok_or(SyscallError::InvalidState)
}

fn prot_to_protection(prot: usize) -> Protection {
    Protection {
        read: prot & PROT_READ != 0,
        write: prot & PROT_WRITE != 0,
        exec: prot & PROT_EXEC != 0,
    }
}

fn check_prot(prot: usize) -> Result<(), SyscallError> {
    if prot & !(PROT_READ | PROT_WRITE | PROT_EXEC) != 0 {
        return Err(SyscallError::InvalidArgument);
    }
    // Enforce W^X.
    if prot & PROT_WRITE != 0 && prot & PROT_EXEC != 0 {
        return Err(SyscallError::PermissionDenied);
    }
    Ok(())
}

/// `anon_alloc(size)` (syscall 3). Allocates a fresh anonymous, read-write
/// region at a kernel-chosen address.
#[cfg(feature = "alloc")]
pub fn sys_anon_alloc(size: usize) -> SyscallResult {
    if size == 0 {
        return Err(SyscallError::InvalidArgument);
    }

    let vas = current()?.address_space();
    let addr = vas
        .map_anon(None, size, Protection::READ_WRITE, Caching::Default, MapFlags::default())
        .ok_or(SyscallError::OutOfMemory)?;

    Ok(addr)
}

#[cfg(not(feature = "alloc"))]
pub fn sys_anon_alloc(_size: usize) -> SyscallResult {
    Err(SyscallError::NotSupported)
}

/// `anon_free(ptr, size)` (syscall 4).
#[cfg(feature = "alloc")]
pub fn sys_anon_free(ptr: usize, size: usize) -> SyscallResult {
    if ptr == 0 || size == 0 {
        return Err(SyscallError::InvalidArgument);
    }

    let vas = current()?.address_space();
    vas.unmap(ptr, size).map_err(|_| SyscallError::InvalidArgument)?;
    Ok(0)
}

#[cfg(not(feature = "alloc"))]
pub fn sys_anon_free(_ptr: usize, _size: usize) -> SyscallResult {
    Err(SyscallError::NotSupported)
}

/// `mmap(hint, len, prot, flags, fd, off)` (syscall 13). Anonymous mappings
/// only; `fd`/`off` are accepted for ABI compatibility but ignored.
#[cfg(feature = "alloc")]
#[allow(clippy::too_many_arguments)]
pub fn sys_mmap(
    hint: usize,
    len: usize,
    prot: usize,
    flags: usize,
    _fd: usize,
    _off: usize,
) -> SyscallResult {
    if len == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    check_prot(prot)?;

    let is_fixed = flags & MAP_FIXED != 0;
    if is_fixed && (hint == 0 || hint & 0xFFF != 0) {
        return Err(SyscallError::InvalidArgument);
    }

    let vas = current()?.address_space();
    let protection = prot_to_protection(prot);
    let map_flags = MapFlags { fixed: is_fixed };
    let hint_addr = (hint != 0).then_some(hint);

    let addr = vas
        .map_anon(hint_addr, len, protection, Caching::Default, map_flags)
        .ok_or(SyscallError::OutOfMemory)?;

    Ok(addr)
}

#[cfg(not(feature = "alloc"))]
#[allow(clippy::too_many_arguments)]
pub fn sys_mmap(
    _hint: usize,
    _len: usize,
    _prot: usize,
    _flags: usize,
    _fd: usize,
    _off: usize,
) -> SyscallResult {
    Err(SyscallError::NotSupported)
}

/// `mprotect(ptr, len, prot)` (syscall 14).
#[cfg(feature = "alloc")]
pub fn sys_mprotect(addr: usize, len: usize, prot: usize) -> SyscallResult {
    if addr == 0 || len == 0 || addr & 0xFFF != 0 {
        return Err(SyscallError::InvalidArgument);
    }
    check_prot(prot)?;

    validate_user_buffer(addr, len)?;

    let vas = current()?.address_space();
    vas.find_mapping(addr).ok_or(SyscallError::InvalidArgument)?;

    vas.mprotect(addr, len, prot_to_protection(prot))
        .map_err(|_| SyscallError::InvalidArgument)?;

    Ok(0)
}

#[cfg(not(feature = "alloc"))]
pub fn sys_mprotect(_addr: usize, _len: usize, _prot: usize) -> SyscallResult {
    Err(SyscallError::NotSupported)
}
