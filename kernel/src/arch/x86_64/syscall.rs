//! x86_64 system call entry point
//!
//! This build brings up a single CPU (mirrors the rest of `sched`), so the
//! entry stub keeps its scratch state in plain statics rather than a
//! per-CPU GS-relative area -- there is only one CPU to scratch for.

#![allow(function_casts_as_integer)]

use core::sync::atomic::{AtomicU64, Ordering};

use crate::syscall::syscall_handler;

/// Stack `syscall_entry` switches onto for the single boot CPU. Sized well
/// above the dispatcher's worst-case usage; no guard page (matches the
/// rest of this build's kernel stacks).
const BOOT_SYSCALL_STACK_SIZE: usize = 16 * 1024;
#[repr(align(16))]
struct BootSyscallStack([u8; BOOT_SYSCALL_STACK_SIZE]);
static mut BOOT_SYSCALL_STACK: BootSyscallStack = BootSyscallStack([0; BOOT_SYSCALL_STACK_SIZE]);

/// Top of the boot CPU's syscall kernel stack, set by [`init_syscall`].
static KERNEL_RSP: AtomicU64 = AtomicU64::new(0);

/// User RSP at the last syscall entry, stashed by the entry stub so the
/// exit path can restore it before `sysretq`.
static SAVED_USER_RSP: AtomicU64 = AtomicU64::new(0);

/// Pointer to the raw register frame pushed by the last syscall entry,
/// valid only for the duration of that syscall. Backs [`current_syscall_frame`]
/// and [`get_saved_user_rsp`], which `fork()` uses to snapshot the caller's
/// live registers into the child thread.
static CURRENT_FRAME: AtomicU64 = AtomicU64::new(0);

/// Raw general-purpose register snapshot captured by [`syscall_entry`],
/// in the order pushed onto the kernel stack (ascending address, i.e. the
/// reverse of push order: `rax` was pushed first and sits at the highest
/// address).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SyscallFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub r11: u64, // user RFLAGS
    pub rcx: u64, // user RIP (return address set by SYSCALL)
    pub r9: u64,
    pub r8: u64,
    pub r10: u64, // arg4, raw syscall convention
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rax: u64, // syscall number
}

/// Set the kernel stack `syscall_entry` switches onto. Must be called once
/// per CPU before `SYSCALL` can be used from user mode; on this single-CPU
/// build, once at boot.
pub fn set_kernel_stack(top: u64) {
    KERNEL_RSP.store(top, Ordering::Release);
}

/// The register frame captured by the syscall currently being handled, if
/// any. `None` outside of syscall context (e.g. called from a kernel
/// thread).
pub fn current_syscall_frame() -> Option<SyscallFrame> {
    let ptr = CURRENT_FRAME.load(Ordering::Acquire);
    if ptr == 0 {
        return None;
    }
    // SAFETY: non-zero only while `syscall_entry` is on the stack between
    // the frame push and its corresponding pop; the pointer references
    // live stack memory for that whole window.
    Some(unsafe { *(ptr as *const SyscallFrame) })
}

/// The user-mode stack pointer saved at the last syscall entry.
pub fn get_saved_user_rsp() -> u64 {
    SAVED_USER_RSP.load(Ordering::Acquire)
}

/// x86_64 SYSCALL instruction entry point.
///
/// Saves the full register frame (for `fork()` to snapshot and for the
/// exit path to restore) and hands `syscall_handler` a pointer to it
/// directly -- the pushed frame's field order matches [`SyscallFrame`], so
/// no register shuffling is needed to expose all six raw syscall argument
/// registers (`rdi, rsi, rdx, r10, r8, r9`) to the dispatcher.
///
/// The dispatcher returns `{value, error}` in `rax:rdx` (the two-eightbyte
/// SysV return convention for a `#[repr(C)]` struct of two integers), so
/// the exit path discards the saved `rax`/`rdx` slots instead of restoring
/// them -- those registers now carry the handler's result, not the
/// caller's original `rax`/arg3.
///
/// # Safety
/// Must only be reached via the CPU's `SYSCALL` instruction.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        "mov [rip + {saved_rsp}], rsp",
        "mov rsp, [rip + {kernel_rsp}]",

        // Save the raw register frame, deepest (first pushed) to
        // shallowest: rax, rdi, rsi, rdx, r10, r8, r9, rcx, r11, rbp, rbx,
        // r12, r13, r14, r15. This matches SyscallFrame's field order
        // exactly, so rsp itself is a valid `*const SyscallFrame` here.
        "push rax",
        "push rdi",
        "push rsi",
        "push rdx",
        "push r10",
        "push r8",
        "push r9",
        "push rcx",
        "push r11",
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        "mov [rip + {cur_frame}], rsp",
        "mov rdi, rsp", // &SyscallFrame, the dispatcher's sole argument
        "call {handler}",

        "mov qword ptr [rip + {cur_frame}], 0",

        // Restore everything the raw syscall ABI preserves across a
        // syscall except rax/rdx, which now hold the handler's
        // {value, error} return pair.
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "pop r11",
        "pop rcx",
        "pop r9",
        "pop r8",
        "pop r10",
        "add rsp, 8", // discard saved rdx (arg3); rdx now holds the error
        "pop rsi",
        "pop rdi",
        "add rsp, 8", // discard saved rax (syscall number); rax now holds the value

        "mov rsp, [rip + {saved_rsp}]",
        "sysretq",

        saved_rsp = sym SAVED_USER_RSP,
        kernel_rsp = sym KERNEL_RSP,
        cur_frame = sym CURRENT_FRAME,
        handler = sym syscall_handler,
    );
}

/// Initialize SYSCALL/SYSRET support: MSRs, segment selectors, and the
/// kernel stack the entry stub switches onto.
#[allow(dead_code)]
pub fn init_syscall() {
    use x86_64::registers::{
        model_specific::{Efer, EferFlags, LStar, Star},
        segmentation::SegmentSelector,
    };

    // SAFETY: taken once at boot, before any syscall can occur.
    let stack_top = unsafe { core::ptr::addr_of!(BOOT_SYSCALL_STACK.0) as u64 + BOOT_SYSCALL_STACK_SIZE as u64 };
    set_kernel_stack(stack_top);

    unsafe {
        Efer::update(|flags| {
            flags.insert(EferFlags::SYSTEM_CALL_EXTENSIONS);
        });

        LStar::write(x86_64::VirtAddr::new(syscall_entry as usize as u64));

        // Set up segment selectors. Star::write requires user_cs == user_ss + 8,
        // matching the gdt module's data-then-code ordering (data=0x28, code=0x30).
        let selectors = super::gdt::selectors();
        Star::write(
            SegmentSelector(selectors.user_code_selector.0), // User CS (ring 3)
            SegmentSelector(selectors.user_data_selector.0),  // User SS (ring 3)
            SegmentSelector(selectors.code_selector.0), // Kernel CS (ring 0)
            SegmentSelector(selectors.data_selector.0), // Kernel SS (ring 0)
        )
        .unwrap();
    }
}
