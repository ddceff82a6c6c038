//! Filesystem system calls: open/close/read/write/seek, mkdir, dup family,
//! getcwd, isatty, ioctl, fcntl (stub), stat.

#![allow(clippy::unnecessary_cast)]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::sync::Arc;

use super::{userspace, SyscallError, SyscallResult};
use crate::{
    fs::{file::File, try_get_vfs, OpenFlags, Permissions, SeekFrom},
    process,
};

fn vfs() -> Result<&'static spin::RwLock<crate::fs::Vfs>, SyscallError> {
    try_get_vfs().ok_or(SyscallError::InvalidState)
}

fn current() -> Result<Arc<process::Process>, SyscallError> {
    process::current_process().ok_or(SyscallError::InvalidState)
}

/// `open(path, flags, mode)` (syscall 5).
pub fn sys_open(path: usize, flags: usize, _mode: usize) -> SyscallResult {
    // SAFETY: validated by copy_string_from_user before any read.
    let path_str = unsafe { userspace::copy_string_from_user(path)? };
    let proc = current()?;

    let open_flags = OpenFlags::from_bits(flags as u32).ok_or(SyscallError::InvalidArgument)?;
    let resolved = proc.cwd.lock().resolve(&path_str);

    let node = vfs()?
        .read()
        .open(&resolved, open_flags)
        .map_err(|_| SyscallError::ResourceNotFound)?;

    let file = File::new_with_path(node, open_flags, resolved);
    proc.file_table
        .lock()
        .open(Arc::new(file))
        .map_err(SyscallError::from)
}

/// `close(fd)` (syscall 6).
pub fn sys_close(fd: usize) -> SyscallResult {
    current()?.file_table.lock().close(fd)?;
    Ok(0)
}

/// `read(fd, buf, len)` (syscall 7).
pub fn sys_read(fd: usize, buffer: usize, count: usize) -> SyscallResult {
    userspace::validate_user_buffer(buffer, count)?;

    let proc = current()?;
    let file = proc
        .file_table
        .lock()
        .get(fd)
        .ok_or(SyscallError::BadFd)?;

    // SAFETY: buffer was validated as a writable user-space range above.
    let buffer_slice = unsafe { core::slice::from_raw_parts_mut(buffer as *mut u8, count) };
    file.read(buffer_slice).map_err(SyscallError::from)
}

/// `write(fd, buf, len)` (syscall 8).
pub fn sys_write(fd: usize, buffer: usize, count: usize) -> SyscallResult {
    userspace::validate_user_buffer(buffer, count)?;

    let proc = current()?;
    let file = proc
        .file_table
        .lock()
        .get(fd)
        .ok_or(SyscallError::BadFd)?;

    // SAFETY: buffer was validated as a readable user-space range above.
    let buffer_slice = unsafe { core::slice::from_raw_parts(buffer as *const u8, count) };
    file.write(buffer_slice).map_err(SyscallError::from)
}

/// `seek(fd, off, whence)` (syscall 9).
pub fn sys_seek(fd: usize, offset: isize, whence: usize) -> SyscallResult {
    let proc = current()?;
    let file = proc
        .file_table
        .lock()
        .get(fd)
        .ok_or(SyscallError::BadFd)?;

    let seek_from = match whence {
        0 => SeekFrom::Start(offset as usize),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return Err(SyscallError::InvalidArgument),
    };

    file.seek(seek_from).map_err(SyscallError::from)
}

/// `mkdir(path, mode)` (syscall 15).
pub fn sys_mkdir(path: usize, mode: usize) -> SyscallResult {
    let path_str = unsafe { userspace::copy_string_from_user(path)? };
    let proc = current()?;
    let resolved = proc.cwd.lock().resolve(&path_str);

    vfs()?
        .read()
        .mkdir(&resolved, Permissions::from_mode(mode as u32))
        .map_err(|_| SyscallError::InvalidState)?;

    Ok(0)
}

/// `dup2(fd, newfd)` (syscall 16).
pub fn sys_dup2(fd: usize, newfd: usize) -> SyscallResult {
    current()?
        .file_table
        .lock()
        .dup2(fd, newfd)
        .map_err(SyscallError::from)?;
    Ok(newfd)
}

/// `getcwd(buf, size)` (syscall 20).
pub fn sys_getcwd(buf: usize, size: usize) -> SyscallResult {
    let proc = current()?;
    let cwd = proc.cwd.lock();
    let path = cwd.get();

    if path.len() + 1 > size {
        return Err(SyscallError::InvalidArgument);
    }

    // SAFETY: size was checked above to be large enough for path + NUL, and
    // buf is validated below to be a writable user-space range.
    userspace::validate_user_buffer(buf, path.len() + 1)?;
    unsafe {
        let dest = core::slice::from_raw_parts_mut(buf as *mut u8, path.len() + 1);
        dest[..path.len()].copy_from_slice(path.as_bytes());
        dest[path.len()] = 0;
    }

    Ok(buf)
}

/// `isatty(fd)` (syscall 21).
pub fn sys_isatty(fd: usize) -> SyscallResult {
    let proc = current()?;
    let file = proc
        .file_table
        .lock()
        .get(fd)
        .ok_or(SyscallError::BadFd)?;

    if file.node.is_tty() {
        Ok(0)
    } else {
        Err(SyscallError::NotATty)
    }
}

/// `ioctl(fd, req, argp)` (syscall 23).
pub fn sys_ioctl(fd: usize, request: usize, arg: usize) -> SyscallResult {
    let proc = current()?;
    let file = proc
        .file_table
        .lock()
        .get(fd)
        .ok_or(SyscallError::BadFd)?;

    file.node
        .ioctl(request, arg)
        .map_err(|_| SyscallError::NotSupported)
}

/// `fcntl(fd, req, arg)` (syscall 24). Stub: only validates the fd exists.
pub fn sys_fcntl(fd: usize, _request: usize, _arg: usize) -> SyscallResult {
    current()?
        .file_table
        .lock()
        .get(fd)
        .ok_or(SyscallError::BadFd)?;
    Ok(0)
}

/// `stat(fd, out)` (syscall 25).
pub fn sys_stat(fd: usize, stat_buf: usize) -> SyscallResult {
    userspace::validate_user_ptr_typed::<FileStat>(stat_buf)?;

    let proc = current()?;
    let file = proc
        .file_table
        .lock()
        .get(fd)
        .ok_or(SyscallError::BadFd)?;

    let metadata = file.node.metadata().map_err(|_| SyscallError::InvalidState)?;

    let stat = FileStat {
        st_size: metadata.size as u64,
        st_blksize: 4096,
        st_blocks: (metadata.size as u64 + 511) / 512,
    };

    // SAFETY: stat_buf was validated above for size and alignment.
    unsafe {
        *(stat_buf as *mut FileStat) = stat;
    }

    Ok(0)
}

/// `dup(fd)` (syscall 26).
pub fn sys_dup(fd: usize) -> SyscallResult {
    current()?
        .file_table
        .lock()
        .dup(fd)
        .map(|fd| fd as usize)
        .map_err(SyscallError::from)
}

#[repr(C)]
struct FileStat {
    st_size: u64,
    st_blksize: u64,
    st_blocks: u64,
}
