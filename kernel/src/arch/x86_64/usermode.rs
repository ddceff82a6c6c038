//! User-mode entry point for x86_64
//!
//! Provides `enter_usermode()` which pushes the iretq frame and transitions
//! the CPU from Ring 0 to Ring 3. Also provides `map_user_page()` for
//! creating user-accessible page table entries through the bootloader's
//! physical memory mapping, used by the ELF loader to back a process's
//! segments before its first dispatch.

use core::arch::asm;

/// Enter user mode for the first time via iretq.
///
/// The iretq instruction pops SS, RSP, RFLAGS, CS, RIP from the stack
/// and transitions the CPU to the privilege level specified in the CS
/// selector's RPL field.
///
/// # Arguments
/// - `entry_point`: User-space RIP (entry point of the user program)
/// - `user_stack`: User-space RSP (top of user stack)
/// - `user_cs`: User code segment selector with RPL=3 (0x33)
/// - `user_ss`: User data segment selector with RPL=3 (0x2B)
///
/// # Safety
/// - `entry_point` must be a valid user-space address with executable code
///   mapped
/// - `user_stack` must be a valid user-space stack address, 16-byte aligned
/// - The correct page tables must be loaded in CR3 with USER-accessible
///   mappings
/// - Per-CPU data (`kernel_rsp`) must be set before calling this, otherwise the
///   first syscall or interrupt will crash due to invalid kernel stack
/// - The GDT must contain valid Ring 3 segments at the specified selectors
pub unsafe fn enter_usermode(entry_point: u64, user_stack: u64, user_cs: u64, user_ss: u64) -> ! {
    // SAFETY: We build the iretq frame on the current kernel stack.
    // iretq expects (from top of stack): RIP, CS, RFLAGS, RSP, SS.
    // We set DS and ES to the user data selector and clear FS/GS.
    // RFLAGS = 0x202: bit 1 (reserved, always 1) + bit 9 (IF = interrupts enabled).
    // The caller guarantees all arguments point to valid mapped memory and
    // the GDT/TSS/per-CPU data are properly configured.
    asm!(
        // Set data segment registers to user data selector
        "mov ds, {ss:r}",
        "mov es, {ss:r}",
        // Clear FS and GS (will be set up later for TLS if needed).
        // Use a dedicated zero operand to avoid clobbering other operands
        // (the compiler may place rflags in eax, so "xor eax, eax" would
        // destroy it).
        "mov fs, {zero:x}",
        "mov gs, {zero:x}",
        // Build iretq frame on current kernel stack:
        //   [RSP+0]  RIP    - user entry point
        //   [RSP+8]  CS     - user code segment (Ring 3)
        //   [RSP+16] RFLAGS - IF set (0x202)
        //   [RSP+24] RSP    - user stack pointer
        //   [RSP+32] SS     - user stack segment (Ring 3)
        "push {ss}",       // SS
        "push {rsp}",      // RSP (user stack)
        "push {rflags}",   // RFLAGS (IF enabled)
        "push {cs}",       // CS
        "push {rip}",      // RIP (entry point)
        "iretq",
        ss = in(reg) user_ss,
        rsp = in(reg) user_stack,
        rflags = in(reg) 0x202u64,
        cs = in(reg) user_cs,
        rip = in(reg) entry_point,
        zero = in(reg) 0u64,
        options(noreturn)
    );
}

/// Enter user mode for a freshly forked thread, restoring the parent's
/// captured register snapshot instead of starting fresh at an entry point.
///
/// Unlike [`enter_usermode`], every general-purpose register the raw
/// syscall ABI preserves (everything but `rax`, `rcx`, `r11`) is restored
/// from `frame`, and `rax` is forced to `0` -- the child's `fork()` return
/// value. `rip`/`rflags` come from `frame.rcx`/`frame.r11`, which is where
/// the parent's `SYSCALL` instruction stashed them.
///
/// # Safety
/// Same requirements as [`enter_usermode`]; additionally, `frame` must
/// point to a valid, fully populated `SyscallFrame`.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn enter_usermode_fork(
    frame: *const super::syscall::SyscallFrame,
    user_sp: u64,
    user_cs: u64,
    user_ss: u64,
) -> ! {
    core::arch::naked_asm!(
        "mov r11, rdi", // r11 = frame ptr, kept live until all fields are read

        "push rcx",                 // SS
        "push rsi",                 // RSP (user stack)
        "push qword ptr [r11 + 48]", // RFLAGS (frame.r11)
        "push rdx",                 // CS
        "push qword ptr [r11 + 56]", // RIP (frame.rcx)

        "mov ds, cx",
        "mov es, cx",
        "xor r9d, r9d",
        "mov fs, r9w",
        "mov gs, r9w",

        "mov rbx, [r11 + 32]",
        "mov rbp, [r11 + 40]",
        "mov r12, [r11 + 24]",
        "mov r13, [r11 + 16]",
        "mov r14, [r11 + 8]",
        "mov r15, [r11 + 0]",
        "mov r9,  [r11 + 64]",
        "mov r8,  [r11 + 72]",
        "mov r10, [r11 + 80]",
        "mov rdx, [r11 + 88]",
        "mov rsi, [r11 + 96]",
        "mov rdi, [r11 + 104]",
        "xor eax, eax",

        "iretq",
    );
}

/// Physical memory offset provided by the bootloader.
///
/// All physical memory is mapped at virtual address `phys_addr + PHYS_OFFSET`.
/// Initialized during `init_phys_offset()` from BOOT_INFO.
static PHYS_OFFSET: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);

/// Get the physical memory offset, or 0 if not yet initialized.
///
/// Used by kernel subsystems that need to convert physical addresses to
/// virtual addresses after the initial user-mode setup.
#[allow(dead_code)] // Helper for phys_to_virt below
fn phys_offset() -> u64 {
    PHYS_OFFSET.load(core::sync::atomic::Ordering::Relaxed)
}

/// Convert a physical address to a virtual address via the bootloader's
/// physical memory mapping.
///
/// Returns `None` if the physical memory offset has not been initialized.
/// Used by kernel subsystems that need to access physical memory after
/// the initial user-mode setup.
#[allow(dead_code)] // Physical-to-virtual conversion for page table manipulation
fn phys_to_virt(phys: u64) -> Option<u64> {
    let offset = phys_offset();
    if offset == 0 {
        return None;
    }
    Some(phys + offset)
}

/// Page table entry flags for x86_64 4-level paging.
const PTE_PRESENT: u64 = 1 << 0;
const PTE_WRITABLE: u64 = 1 << 1;
const PTE_USER: u64 = 1 << 2;

/// Extract the physical address of the next-level page table from a PTE.
///
/// The physical address is stored in bits 12..51 of the entry.
fn pte_phys_addr(entry: u64) -> u64 {
    entry & 0x000F_FFFF_FFFF_F000
}

/// Map a single 4KiB page in the current page tables with USER access.
///
/// Walks the 4-level page table hierarchy (PML4 -> PDPT -> PD -> PT),
/// allocating intermediate tables as needed from the frame allocator.
/// The leaf entry maps `virt_addr` to `phys_frame_addr` with the given flags.
///
/// # Safety
/// - `phys_offset_val` must be the correct bootloader physical memory offset
/// - `virt_addr` must be page-aligned (4KiB)
/// - `phys_frame_addr` must be a valid, page-aligned physical address
/// - The caller must ensure no conflicting mapping exists
unsafe fn map_user_page(
    phys_offset_val: u64,
    virt_addr: u64,
    phys_frame_addr: u64,
    flags: u64,
) -> Result<(), crate::error::KernelError> {
    // Read current CR3 to get the PML4 physical address
    let cr3: u64;
    // SAFETY: Reading CR3 is always valid in kernel mode.
    asm!("mov {}, cr3", out(reg) cr3);
    let pml4_phys = cr3 & 0x000F_FFFF_FFFF_F000;

    // Extract page table indices from the virtual address
    let pml4_idx = ((virt_addr >> 39) & 0x1FF) as usize;
    let pdpt_idx = ((virt_addr >> 30) & 0x1FF) as usize;
    let pd_idx = ((virt_addr >> 21) & 0x1FF) as usize;
    let pt_idx = ((virt_addr >> 12) & 0x1FF) as usize;

    // Walk PML4 -> PDPT
    let pml4_virt = (pml4_phys + phys_offset_val) as *mut u64;
    let pml4_entry = pml4_virt.add(pml4_idx);
    let pdpt_phys = ensure_table_present(pml4_entry, phys_offset_val)?;

    // Walk PDPT -> PD
    let pdpt_virt = (pdpt_phys + phys_offset_val) as *mut u64;
    let pdpt_entry = pdpt_virt.add(pdpt_idx);
    let pd_phys = ensure_table_present(pdpt_entry, phys_offset_val)?;

    // Walk PD -> PT
    let pd_virt = (pd_phys + phys_offset_val) as *mut u64;
    let pd_entry = pd_virt.add(pd_idx);
    let pt_phys = ensure_table_present(pd_entry, phys_offset_val)?;

    // Set the leaf PT entry
    let pt_virt = (pt_phys + phys_offset_val) as *mut u64;
    let pt_entry = pt_virt.add(pt_idx);
    // SAFETY: pt_entry points into a valid page table mapped via the physical
    // memory offset. We write the leaf mapping: physical frame + flags.
    pt_entry.write_volatile(phys_frame_addr | flags);

    // Flush TLB for this address
    // SAFETY: invlpg invalidates the TLB entry for virt_addr. No side effects.
    asm!("invlpg [{}]", in(reg) virt_addr);

    Ok(())
}

/// Ensure a page table entry at `entry_ptr` is present. If not, allocate
/// a new zeroed frame for the next-level table and write the entry.
///
/// Returns the physical address of the next-level table.
///
/// # Safety
/// - `entry_ptr` must point to a valid page table entry in mapped memory
/// - `phys_offset_val` must be the correct physical memory offset
unsafe fn ensure_table_present(
    entry_ptr: *mut u64,
    phys_offset_val: u64,
) -> Result<u64, crate::error::KernelError> {
    // SAFETY: entry_ptr was computed from a valid page table base + index,
    // both within the physical memory mapping provided by the bootloader.
    let entry = entry_ptr.read_volatile();

    if (entry & PTE_PRESENT) != 0 {
        // Table already exists. Ensure USER bit is set on intermediate entries
        // so user-mode accesses can traverse the hierarchy.
        let updated = entry | PTE_USER | PTE_WRITABLE;
        if updated != entry {
            // SAFETY: Updating flags on an existing present entry is safe.
            // We only add USER and WRITABLE bits to intermediate tables.
            entry_ptr.write_volatile(updated);
        }
        Ok(pte_phys_addr(entry))
    } else {
        // Allocate a new frame for the next-level table
        let frame = crate::mm::FRAME_ALLOCATOR
            .lock()
            .allocate_frames(1, None)
            .map_err(|_| crate::error::KernelError::ResourceExhausted {
                resource: "physical frames",
            })?;
        let frame_phys = frame.as_u64() * crate::mm::FRAME_SIZE as u64;

        // Zero the new table
        let frame_virt = (frame_phys + phys_offset_val) as *mut u8;
        // SAFETY: frame_virt points to a freshly allocated 4KiB frame mapped
        // via the physical memory offset. write_bytes zeroes the entire page.
        core::ptr::write_bytes(frame_virt, 0, 4096);

        // Write the entry: physical address + PRESENT + WRITABLE + USER
        let new_entry = frame_phys | PTE_PRESENT | PTE_WRITABLE | PTE_USER;
        // SAFETY: entry_ptr points to a valid PTE slot. Writing a new entry
        // that points to our freshly zeroed frame is safe.
        entry_ptr.write_volatile(new_entry);

        Ok(frame_phys)
    }
}

/// Check if a physical address is used by the active page table hierarchy.
///
/// Walks PML4 -> PDPT -> PD -> PT and returns true if `phys` matches any
/// page-table frame's base address. This is O(n) in the number of page table
/// pages (~1000 for a typical bootloader mapping).
///
/// # Safety
/// - `phys_offset` must be the bootloader's physical memory offset
/// - `pml4_phys` must be a valid PML4 physical address (from CR3)
unsafe fn is_page_table_frame(phys_offset: u64, pml4_phys: u64, phys: u64) -> bool {
    if phys == pml4_phys {
        return true;
    }

    let pml4_virt = (pml4_phys + phys_offset) as *const u64;
    for i in 0..512 {
        // SAFETY: pml4_virt + i is within the PML4 page, mapped via phys_offset.
        let pml4_entry = pml4_virt.add(i).read_volatile();
        if (pml4_entry & PTE_PRESENT) == 0 {
            continue;
        }
        let pdpt_phys = pte_phys_addr(pml4_entry);
        if phys == pdpt_phys {
            return true;
        }

        let pdpt_virt = (pdpt_phys + phys_offset) as *const u64;
        for j in 0..512 {
            // SAFETY: pdpt_virt + j is within the PDPT page.
            let pdpt_entry = pdpt_virt.add(j).read_volatile();
            if (pdpt_entry & PTE_PRESENT) == 0 {
                continue;
            }
            if (pdpt_entry & (1 << 7)) != 0 {
                continue; // 1GiB huge page
            }
            let pd_phys = pte_phys_addr(pdpt_entry);
            if phys == pd_phys {
                return true;
            }

            let pd_virt = (pd_phys + phys_offset) as *const u64;
            for k in 0..512 {
                // SAFETY: pd_virt + k is within the PD page.
                let pd_entry = pd_virt.add(k).read_volatile();
                if (pd_entry & PTE_PRESENT) == 0 {
                    continue;
                }
                if (pd_entry & (1 << 7)) != 0 {
                    continue; // 2MiB huge page
                }
                let pt_phys = pte_phys_addr(pd_entry);
                if phys == pt_phys {
                    return true;
                }
            }
        }
    }

    false
}

/// Allocate a physical frame that does not overlap with any active page table
/// page. Frames that are page table pages are allocated (to consume them from
/// the free pool) but not returned.
///
/// # Safety
/// - `phys_offset` and `pml4_phys` must be valid (see `is_page_table_frame`)
unsafe fn allocate_safe_frame(
    phys_offset: u64,
    pml4_phys: u64,
    count: usize,
) -> Result<crate::mm::FrameNumber, crate::error::KernelError> {
    use crate::mm::{FRAME_ALLOCATOR, FRAME_SIZE};

    // Try up to 8192 times (enough to skip the ~1050 page table frames)
    for _ in 0..8192 {
        let frame = FRAME_ALLOCATOR
            .lock()
            .allocate_frames(count, None)
            .map_err(|_| crate::error::KernelError::ResourceExhausted {
                resource: "physical frames",
            })?;
        let phys = frame.as_u64() * FRAME_SIZE as u64;

        // Check all allocated frames in the range
        let mut overlaps = false;
        for f in 0..count as u64 {
            if is_page_table_frame(phys_offset, pml4_phys, phys + f * FRAME_SIZE as u64) {
                overlaps = true;
                break;
            }
        }

        if !overlaps {
            return Ok(frame);
        }
        // Frame overlaps a page table page -- leave it allocated (consumed)
        // so the allocator won't return it again, and try the next one.
    }

    Err(crate::error::KernelError::ResourceExhausted {
        resource: "non-page-table frames",
    })
}

/// Record the bootloader's physical memory offset so later page-table edits
/// (`map_user_page`, called from the ELF loader) can translate physical
/// frame addresses to the direct-mapped virtual alias.
///
/// Must run once, early, before any `map_user_page` call.
pub fn init_phys_offset() -> Result<(), crate::error::KernelError> {
    // SAFETY: BOOT_INFO is a static mut written once during early boot
    // (in main.rs) and only read afterwards. At this point no other code
    // is concurrently mutating it.
    let phys_offset_val = unsafe {
        let boot_info_ptr = core::ptr::addr_of!(crate::arch::x86_64::boot::BOOT_INFO);
        let boot_info =
            (*boot_info_ptr)
                .as_ref()
                .ok_or(crate::error::KernelError::NotInitialized {
                    subsystem: "BOOT_INFO",
                })?;
        boot_info.physical_memory_offset.into_option().ok_or(
            crate::error::KernelError::NotInitialized {
                subsystem: "physical memory offset",
            },
        )?
    };
    PHYS_OFFSET.store(phys_offset_val, core::sync::atomic::Ordering::Relaxed);
    Ok(())
}

/// Map `virt` to a freshly allocated, zeroed, user-accessible physical frame
/// in the currently loaded page tables. Used by the ELF loader to back a
/// process's code/data/stack regions before the first transition to Ring 3.
pub fn map_user_frame(virt: u64) -> Result<u64, crate::error::KernelError> {
    let phys_offset_val = phys_offset();
    if phys_offset_val == 0 {
        return Err(crate::error::KernelError::NotInitialized {
            subsystem: "physical memory offset",
        });
    }
    let cr3_val: u64;
    // SAFETY: reading CR3 is always valid in kernel mode.
    unsafe {
        asm!("mov {}, cr3", out(reg) cr3_val);
    }
    let pml4_phys = cr3_val & 0x000F_FFFF_FFFF_F000;
    // SAFETY: phys_offset_val and pml4_phys come from live kernel state.
    let frame = unsafe { allocate_safe_frame(phys_offset_val, pml4_phys, 1)? };
    let phys = frame.as_u64() * crate::mm::FRAME_SIZE as u64;
    // SAFETY: virt is page-aligned by the caller (ELF loader rounds to page
    // boundaries); phys is a frame we just allocated and own exclusively.
    unsafe {
        map_user_page(
            phys_offset_val,
            virt,
            phys,
            PTE_PRESENT | PTE_WRITABLE | PTE_USER,
        )?;
    }
    Ok(phys)
}

