//! Time system calls: gettime, nsleep.

use super::{userspace, SyscallError, SyscallResult};

/// `CLOCK_REALTIME`: no wall-clock source is wired up, so this always reads
/// back as zero.
pub const CLOCK_REALTIME: usize = 0;
/// `CLOCK_MONOTONIC`: boot-relative, backed by the same tick count the event
/// queue uses for sleep deadlines.
pub const CLOCK_MONOTONIC: usize = 1;

#[repr(C)]
struct Timespec {
    sec: u64,
    nsec: u64,
}

/// `gettime(clock, out_ts)` (syscall 17).
pub fn sys_gettime(clock: usize, out_ts: usize) -> SyscallResult {
    let ts = match clock {
        CLOCK_REALTIME => Timespec { sec: 0, nsec: 0 },
        CLOCK_MONOTONIC => {
            let now = crate::timer::now_ns();
            Timespec {
                sec: now / 1_000_000_000,
                nsec: now % 1_000_000_000,
            }
        }
        _ => return Err(SyscallError::InvalidArgument),
    };

    userspace::validate_user_ptr_typed::<Timespec>(out_ts)?;
    // SAFETY: validated above for size and alignment.
    unsafe {
        *(out_ts as *mut Timespec) = ts;
    }
    Ok(0)
}

/// `nsleep(ns)` (syscall 18). Blocks the calling thread for at least `ns`
/// nanoseconds.
#[cfg(feature = "alloc")]
pub fn sys_nsleep(ns: usize) -> SyscallResult {
    crate::sched::sleep(ns as u64);
    Ok(0)
}

#[cfg(not(feature = "alloc"))]
pub fn sys_nsleep(_ns: usize) -> SyscallResult {
    Err(SyscallError::NotSupported)
}
