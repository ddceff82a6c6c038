//! Memory management: physical frame allocator (§4.1), 4-level page table
//! manager (§4.2) and per-address-space region lists (§4.3).

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

pub mod frame_allocator;
pub mod page_table;
pub mod vas;

pub use frame_allocator::{
    FrameAllocatorError, FrameNumber, PhysicalAddress, PhysicalFrame, FRAME_ALLOCATOR, FRAME_SIZE,
};
pub use vas::{Caching, MapFlags, Protection, VirtualAddressSpace};

/// Translate a physical address to its kernel-virtual alias via the
/// bootloader's direct physical memory map (`arch::x86_64::msr::phys_to_virt`).
/// Every page table walk in [`page_table`]/[`vas`] goes through this so table
/// frames are dereferenced through the mapping that's actually valid, rather
/// than assuming identity mapping.
pub fn phys_to_virt_addr(phys: u64) -> u64 {
    crate::arch::x86_64::msr::phys_to_virt(phys as usize)
        .expect("physical memory map not initialized") as u64
}

/// Virtual memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }
}

/// Page size options
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    /// 4 KiB pages
    Small = 4096,
    /// 2 MiB pages (x86_64) / 2 MiB (AArch64)
    Large = 2 * 1024 * 1024,
    /// 1 GiB pages (x86_64) / 1 GiB (AArch64)
    Huge = 1024 * 1024 * 1024,
}

/// Page table entry flags. The 4-level walker (`page_table`) and the region
/// list (`vas`) both read `.0` directly when testing raw entry bits, so this
/// stays a plain bitset rather than an opaque `bitflags!` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(pub u64);

impl PageFlags {
    pub const PRESENT: Self = Self(1 << 0);
    pub const WRITABLE: Self = Self(1 << 1);
    pub const USER: Self = Self(1 << 2);
    pub const WRITE_THROUGH: Self = Self(1 << 3);
    pub const NO_CACHE: Self = Self(1 << 4);
    pub const ACCESSED: Self = Self(1 << 5);
    pub const DIRTY: Self = Self(1 << 6);
    pub const HUGE: Self = Self(1 << 7);
    pub const GLOBAL: Self = Self(1 << 8);
    pub const NO_EXECUTE: Self = Self(1 << 63);

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for PageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for PageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Physical frame backing the kernel's half of every page table (the
/// bootloader's own root, read once out of CR3). [`page_table::create_root_table`]
/// copies its upper-half (PML4 256..512) entries into every freshly
/// allocated address space so kernel code and the direct map stay reachable
/// no matter which CR3 is loaded.
static KERNEL_ROOT: AtomicU64 = AtomicU64::new(0);

fn set_kernel_root(frame: FrameNumber) {
    KERNEL_ROOT.store(frame.as_u64(), Ordering::Release);
}

/// The kernel's root page table frame, if [`init`] has run.
pub fn kernel_root() -> Option<FrameNumber> {
    let v = KERNEL_ROOT.load(Ordering::Acquire);
    (v != 0).then(|| FrameNumber::new(v))
}

/// Size of the kernel heap mapped at [`crate::arch::x86_64::HEAP_START`].
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
const KERNEL_HEAP_SIZE: usize = 8 * 1024 * 1024;

/// Initialize memory management: seed the frame allocator from the boot
/// memory map, record the bootloader's page table as the shared kernel
/// root, and map+initialize the kernel heap.
#[allow(dead_code)]
pub fn init() {
    println!("[MM] Initializing memory management...");

    #[cfg(feature = "alloc")]
    {
        let regions = crate::arch::x86_64::boot::usable_regions();
        let region_count = regions.len();
        FRAME_ALLOCATOR.lock().init(&regions);
        let (free, total) = frame_allocator::stats();
        println!(
            "[MM] Frame allocator seeded from {} usable regions: {}/{} frames free",
            region_count, free, total
        );
    }

    let kernel_root_phys = crate::arch::x86_64::mmu::read_cr3();
    let kernel_root_frame = FrameNumber::from_addr(kernel_root_phys);
    set_kernel_root(kernel_root_frame);
    println!("[MM] Kernel root page table at {:#x}", kernel_root_phys.as_u64());

    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    init_kernel_heap(kernel_root_frame);

    println!("[MM] Memory management initialized");
}

/// Allocate and map `KERNEL_HEAP_SIZE` bytes at `HEAP_START` into the
/// kernel's own root, then hand that range to the global allocator.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
fn init_kernel_heap(kernel_root: FrameNumber) {
    let pages = KERNEL_HEAP_SIZE / FRAME_SIZE;
    for i in 0..pages {
        let vaddr = VirtualAddress::new((crate::arch::x86_64::HEAP_START + i * FRAME_SIZE) as u64);
        let frame = FRAME_ALLOCATOR
            .lock()
            .alloc(false)
            .expect("out of memory initializing kernel heap");
        page_table::map(kernel_root, vaddr, frame.addr(), true, false, false, false)
            .expect("failed to map kernel heap page");
    }

    // SAFETY: the range just mapped above is exclusively owned by the
    // allocator from this point on; nothing else has a reference into it yet.
    unsafe {
        crate::get_allocator()
            .lock()
            .init(crate::arch::x86_64::HEAP_START as *mut u8, KERNEL_HEAP_SIZE);
    }

    println!(
        "[MM] Kernel heap initialized: {} KiB at {:#x}",
        KERNEL_HEAP_SIZE / 1024,
        crate::arch::x86_64::HEAP_START
    );
}
