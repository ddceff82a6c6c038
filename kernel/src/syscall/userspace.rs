//! User space memory access utilities
//!
//! Safe functions for copying data between kernel and user space.

use core::{ptr, slice, str};

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::{string::String, vec::Vec};

use super::SyscallError;

/// Maximum string length copied from user space for general paths.
const MAX_USER_STRING_LEN: usize = 4096;

/// Cap on the number of strings copied out of an argv/envp array.
const MAX_USER_ARRAY_STRINGS: usize = 128;

/// Cap on the length of each string within an argv/envp array.
const MAX_USER_ARRAY_STRING_LEN: usize = 256;

/// Check that a user pointer and the `size` bytes after it lie in user
/// address space and don't overflow.
pub fn validate_user_ptr(ptr: usize, size: usize) -> Result<(), SyscallError> {
    if ptr == 0 {
        return Err(SyscallError::InvalidPointer);
    }

    if ptr.checked_add(size).is_none() {
        return Err(SyscallError::InvalidPointer);
    }

    // User space is 0x0 - 0x7FFF_FFFF_FFFF (128 TiB); above that is kernel
    // space and never a valid syscall argument.
    if ptr >= 0x8000_0000_0000 {
        return Err(SyscallError::InvalidPointer);
    }

    Ok(())
}

/// Alias for call sites that think of the check as "is this buffer valid"
/// rather than "is this pointer valid".
pub fn validate_user_buffer(ptr: usize, size: usize) -> Result<(), SyscallError> {
    validate_user_ptr(ptr, size)
}

/// Validate a user pointer sized and aligned for `T`.
pub fn validate_user_ptr_typed<T>(ptr: usize) -> Result<(), SyscallError> {
    validate_user_ptr(ptr, core::mem::size_of::<T>())?;
    if ptr % core::mem::align_of::<T>() != 0 {
        return Err(SyscallError::InvalidArgument);
    }
    Ok(())
}

/// Copy a null-terminated string from user space, capped at
/// `MAX_USER_STRING_LEN` bytes.
///
/// # Safety
/// `user_ptr` must point at memory the calling process can legally read;
/// this function validates it is in user address space but cannot verify
/// it is actually mapped.
pub unsafe fn copy_string_from_user(user_ptr: usize) -> Result<String, SyscallError> {
    copy_bounded_string_from_user(user_ptr, MAX_USER_STRING_LEN)
}

unsafe fn copy_bounded_string_from_user(
    user_ptr: usize,
    max_len: usize,
) -> Result<String, SyscallError> {
    validate_user_ptr(user_ptr, 1)?;

    let mut len = 0;
    let mut ptr = user_ptr as *const u8;

    while len < max_len {
        if len % 4096 == 0 {
            validate_user_ptr(ptr as usize, 1)?;
        }

        let byte = ptr::read_volatile(ptr);
        if byte == 0 {
            break;
        }

        len += 1;
        ptr = ptr.add(1);
    }

    if len >= max_len {
        return Err(SyscallError::NameTooLong);
    }

    let slice = slice::from_raw_parts(user_ptr as *const u8, len);
    let string = String::from(str::from_utf8(slice).map_err(|_| SyscallError::InvalidArgument)?);

    Ok(string)
}

/// Copy data from user space to kernel space.
///
/// # Safety
/// `user_ptr` must point at memory the calling process can legally read.
pub unsafe fn copy_from_user<T>(user_ptr: usize) -> Result<T, SyscallError>
where
    T: Copy,
{
    let size = core::mem::size_of::<T>();
    validate_user_ptr(user_ptr, size)?;
    Ok(ptr::read_volatile(user_ptr as *const T))
}

/// Copy data from kernel space to user space.
///
/// # Safety
/// `user_ptr` must point at memory the calling process can legally write.
pub unsafe fn copy_to_user<T>(user_ptr: usize, value: &T) -> Result<(), SyscallError>
where
    T: Copy,
{
    let size = core::mem::size_of::<T>();
    validate_user_ptr(user_ptr, size)?;
    ptr::write_volatile(user_ptr as *mut T, *value);
    Ok(())
}

/// Copy a byte slice from user space.
///
/// # Safety
/// `user_ptr` must point at memory the calling process can legally read.
pub unsafe fn copy_slice_from_user(user_ptr: usize, len: usize) -> Result<Vec<u8>, SyscallError> {
    validate_user_ptr(user_ptr, len)?;
    let slice = slice::from_raw_parts(user_ptr as *const u8, len);
    Ok(slice.to_vec())
}

/// Copy a byte slice to user space.
///
/// # Safety
/// `user_ptr` must point at memory the calling process can legally write.
pub unsafe fn copy_slice_to_user(user_ptr: usize, data: &[u8]) -> Result<(), SyscallError> {
    validate_user_ptr(user_ptr, data.len())?;
    let dest = slice::from_raw_parts_mut(user_ptr as *mut u8, data.len());
    dest.copy_from_slice(data);
    Ok(())
}

/// Copy a null-terminated pointer array (argv/envp) from user space.
///
/// Caps the count at 128 strings and each string at 256 bytes, matching
/// what `execve` is willing to copy in.
///
/// # Safety
/// `array_ptr` must either be 0 or point at a null-terminated array of
/// user-space string pointers.
pub unsafe fn copy_string_array_from_user(array_ptr: usize) -> Result<Vec<String>, SyscallError> {
    if array_ptr == 0 {
        return Ok(Vec::new());
    }

    let mut strings = Vec::new();
    let mut current_ptr = array_ptr;

    loop {
        validate_user_ptr(current_ptr, 8)?;
        let string_ptr = ptr::read_volatile(current_ptr as *const usize);

        if string_ptr == 0 {
            break;
        }

        strings.push(copy_bounded_string_from_user(
            string_ptr,
            MAX_USER_ARRAY_STRING_LEN,
        )?);

        current_ptr += 8;

        if strings.len() >= MAX_USER_ARRAY_STRINGS {
            return Err(SyscallError::InvalidArgument);
        }
    }

    Ok(strings)
}
