//! Kernel-internal error types.
//!
//! Every fallible internal function returns [`KernelResult`]. The syscall
//! dispatcher is the only place that converts a [`KernelError`] to a POSIX
//! errno, via [`KernelError::to_errno`]; no other layer hand-rolls an errno
//! integer.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    OutOfMemory {
        requested: usize,
        available: usize,
    },
    InvalidAddress {
        addr: usize,
    },
    UnmappedMemory {
        addr: usize,
    },
    ProcessNotFound {
        pid: u64,
    },
    ThreadNotFound {
        tid: u64,
    },
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    SchedulerError(SchedError),
    SyscallError(SyscallError),
    FsError(FsError),
    HardwareError {
        device: &'static str,
        code: u32,
    },
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
    OperationNotSupported {
        operation: &'static str,
    },
    ResourceExhausted {
        resource: &'static str,
    },
    PermissionDenied {
        operation: &'static str,
    },
    AlreadyExists {
        resource: &'static str,
        id: u64,
    },
    NotFound {
        resource: &'static str,
        id: u64,
    },
    NotImplemented {
        feature: &'static str,
    },
    /// Operation would block (no timeout support; see mutex acquisition).
    WouldBlock,
    /// Subsystem not initialized (called before init()).
    NotInitialized {
        subsystem: &'static str,
    },
}

/// Scheduler-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    InvalidCpuId { cpu: usize },
    TaskNotFound { tid: u64 },
    QueueEmpty,
    AlreadyScheduled,
}

/// System call errors (pre-errno-mapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall { nr: usize },
    InvalidArgument { arg: usize },
    InvalidPointer { addr: usize },
    BufferTooSmall { required: usize, provided: usize },
    StringTooLong { max: usize },
    AccessDenied,
    NotImplemented,
}

/// Filesystem-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    NotADirectory,
    NotAFile,
    IsADirectory,
    ReadOnly,
    InvalidPath,
    NoRootFs,
    AlreadyMounted,
    NotMounted,
    UnknownFsType,
    IoError,
    DirectoryNotEmpty,
    TooManyOpenFiles,
    BadFileDescriptor,
    NotSupported,
    NameTooLong,
    FileTooLarge,
    InvalidSeek,
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

// POSIX errno values named in the spec's user ABI (§6).
pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const EBADF: i32 = 9;
pub const ENOMEM: i32 = 12;
pub const EFAULT: i32 = 14;
pub const EBUSY: i32 = 16;
pub const EEXIST: i32 = 17;
pub const ENOTDIR: i32 = 20;
pub const EISDIR: i32 = 21;
pub const EINVAL: i32 = 22;
pub const ENFILE: i32 = 23;
pub const EMFILE: i32 = 24;
pub const ENOTTY: i32 = 25;
pub const ENOSPC: i32 = 28;
pub const ENAMETOOLONG: i32 = 36;
pub const ENOSYS: i32 = 38;
pub const ENOTEMPTY: i32 = 39;

impl KernelError {
    /// Map an internal error onto a negative POSIX errno, the only currency
    /// syscall handlers return across the user/kernel boundary.
    pub fn to_errno(self) -> i32 {
        let positive = match self {
            Self::OutOfMemory { .. } | Self::ResourceExhausted { .. } => ENOMEM,
            Self::InvalidAddress { .. } | Self::UnmappedMemory { .. } => EFAULT,
            Self::ProcessNotFound { .. } | Self::ThreadNotFound { .. } => ESRCH,
            Self::InvalidState { .. } => EINVAL,
            Self::SchedulerError(_) => EINVAL,
            Self::SyscallError(e) => return -syscall_errno(e),
            Self::FsError(e) => return -fs_errno(e),
            Self::HardwareError { .. } => EIO,
            Self::InvalidArgument { .. } => EINVAL,
            Self::OperationNotSupported { .. } | Self::NotImplemented { .. } => ENOSYS,
            Self::PermissionDenied { .. } => EPERM,
            Self::AlreadyExists { .. } => EEXIST,
            Self::NotFound { .. } => ENOENT,
            Self::WouldBlock => EAGAIN,
            Self::NotInitialized { .. } => EIO,
        };
        -positive
    }
}

const ESRCH: i32 = 3;
const EAGAIN: i32 = 11;

fn syscall_errno(e: SyscallError) -> i32 {
    match e {
        SyscallError::InvalidSyscall { .. } => ENOSYS,
        SyscallError::InvalidArgument { .. } => EINVAL,
        SyscallError::InvalidPointer { .. } => EFAULT,
        SyscallError::BufferTooSmall { .. } => EINVAL,
        SyscallError::StringTooLong { .. } => ENAMETOOLONG,
        SyscallError::AccessDenied => EPERM,
        SyscallError::NotImplemented => ENOSYS,
    }
}

fn fs_errno(e: FsError) -> i32 {
    match e {
        FsError::NotFound => ENOENT,
        FsError::AlreadyExists => EEXIST,
        FsError::PermissionDenied => EPERM,
        FsError::NotADirectory => ENOTDIR,
        FsError::NotAFile | FsError::IsADirectory => EISDIR,
        FsError::ReadOnly => EPERM,
        FsError::InvalidPath => EINVAL,
        FsError::NoRootFs => EIO,
        FsError::AlreadyMounted | FsError::NotMounted => EBUSY,
        FsError::UnknownFsType => EINVAL,
        FsError::IoError => EIO,
        FsError::DirectoryNotEmpty => ENOTEMPTY,
        FsError::TooManyOpenFiles => EMFILE,
        FsError::BadFileDescriptor => EBADF,
        FsError::NotSupported => ENOSYS,
        FsError::NameTooLong => ENAMETOOLONG,
        FsError::FileTooLarge => ENOSPC,
        FsError::InvalidSeek => EINVAL,
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "out of memory: requested {} bytes, {} available",
                requested, available
            ),
            Self::InvalidAddress { addr } => write!(f, "invalid address: {:#x}", addr),
            Self::UnmappedMemory { addr } => write!(f, "unmapped memory at {:#x}", addr),
            Self::ProcessNotFound { pid } => write!(f, "process {} not found", pid),
            Self::ThreadNotFound { tid } => write!(f, "thread {} not found", tid),
            Self::InvalidState { expected, actual } => {
                write!(f, "invalid state: expected {}, got {}", expected, actual)
            }
            Self::SchedulerError(e) => write!(f, "scheduler error: {:?}", e),
            Self::SyscallError(e) => write!(f, "syscall error: {:?}", e),
            Self::FsError(e) => write!(f, "filesystem error: {:?}", e),
            Self::HardwareError { device, code } => {
                write!(f, "hardware error on {}: code {:#x}", device, code)
            }
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{}': {}", name, value)
            }
            Self::OperationNotSupported { operation } => {
                write!(f, "operation not supported: {}", operation)
            }
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {}", resource),
            Self::PermissionDenied { operation } => {
                write!(f, "permission denied for operation: {}", operation)
            }
            Self::AlreadyExists { resource, id } => {
                write!(f, "{} with id {} already exists", resource, id)
            }
            Self::NotFound { resource, id } => write!(f, "{} with id {} not found", resource, id),
            Self::NotImplemented { feature } => write!(f, "feature not implemented: {}", feature),
            Self::WouldBlock => write!(f, "operation would block"),
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {}", subsystem)
            }
        }
    }
}

impl From<SchedError> for KernelError {
    fn from(err: SchedError) -> Self {
        Self::SchedulerError(err)
    }
}

impl From<SyscallError> for KernelError {
    fn from(err: SyscallError) -> Self {
        Self::SyscallError(err)
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        Self::FsError(err)
    }
}

/// VFS node operations report failures as a `&'static str` reason; the
/// `?` operator in `fs::File`'s read/write/seek needs this to land them in
/// `KernelError` without each call site matching by hand.
impl From<&'static str> for KernelError {
    fn from(_reason: &'static str) -> Self {
        Self::FsError(FsError::IoError)
    }
}
