//! Boot shim glue: stashes the `bootloader_api` `BootInfo` record so later
//! init stages (direct map translation, frame allocator seeding) can reach
//! it without threading a reference through every call site.

use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use bootloader_api::BootInfo;

/// The record handed to us by the boot shim. Populated once, before any
/// other subsystem touches memory, and never mutated afterward.
pub static mut BOOT_INFO: Option<&'static BootInfo> = None;

/// # Safety
/// Must be called exactly once, at the very start of kernel entry, before
/// any other CPU could observe `BOOT_INFO`.
pub unsafe fn set_boot_info(info: &'static BootInfo) {
    BOOT_INFO = Some(info);
}

/// The high-half base the boot shim mapped all physical memory at.
pub fn physical_memory_offset() -> u64 {
    // SAFETY: read-only access after `set_boot_info`, single-threaded boot.
    unsafe { BOOT_INFO }
        .expect("boot info not set")
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not map physical memory")
}

fn memory_regions() -> &'static MemoryRegions {
    // SAFETY: read-only access after `set_boot_info`.
    &unsafe { BOOT_INFO }.expect("boot info not set").memory_regions
}

/// Usable memory-map entries as `(start_paddr, frame_count)`, matching
/// [`crate::mm::frame_allocator::UsableRegion`] layout. Reclaimable
/// bootloader memory is intentionally excluded.
pub fn usable_regions() -> alloc::vec::Vec<crate::mm::frame_allocator::UsableRegion> {
    use crate::mm::frame_allocator::UsableRegion;
    use crate::mm::{PhysicalAddress, FRAME_SIZE};

    memory_regions()
        .iter()
        .filter(|r| r.kind == MemoryRegionKind::Usable)
        .map(|r| {
            let len = r.end - r.start;
            UsableRegion {
                start: PhysicalAddress::new(r.start),
                frame_count: (len / FRAME_SIZE as u64) as usize,
            }
        })
        .collect()
}

/// Address and length of the `initrd` boot module, if the boot shim passed
/// one via the ramdisk fields.
pub fn initrd() -> Option<(u64, u64)> {
    // SAFETY: read-only access after `set_boot_info`.
    let info = unsafe { BOOT_INFO }.expect("boot info not set");
    let addr = info.ramdisk_addr.into_option()?;
    Some((addr, info.ramdisk_len))
}
