//! Physical Frame Allocator (§4.1): a single intrusive free list of 4 KiB
//! frames threaded through the first bytes of each free frame, accessed
//! through the high-half direct map. One spinlock, no fragmentation
//! concerns since every allocation is exactly one page.

use core::sync::atomic::{AtomicUsize, Ordering};

use lazy_static::lazy_static;

use crate::error::{KernelError, KernelResult};
use crate::sync::Spinlock;

/// Size of a single page frame.
pub const FRAME_SIZE: usize = 4096;

/// A physical address. Page-aligned where page frames are meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn is_aligned(&self) -> bool {
        self.0 % FRAME_SIZE as u64 == 0
    }
}

/// Index of a physical frame (`paddr / FRAME_SIZE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(pub u64);

impl FrameNumber {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn addr(&self) -> PhysicalAddress {
        PhysicalAddress(self.0 * FRAME_SIZE as u64)
    }

    pub const fn from_addr(addr: PhysicalAddress) -> Self {
        Self(addr.0 / FRAME_SIZE as u64)
    }
}

/// A single physical frame identity. The spec's PFA is a bare alloc/free
/// pair rather than an owning RAII guard -- callers that want scope-based
/// cleanup (e.g. kernel stacks in `process::thread`) wrap this themselves.
pub type PhysicalFrame = FrameNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocatorError {
    OutOfMemory,
    NotInitialized,
}

impl From<FrameAllocatorError> for KernelError {
    fn from(e: FrameAllocatorError) -> Self {
        match e {
            FrameAllocatorError::OutOfMemory => KernelError::OutOfMemory {
                requested: FRAME_SIZE,
                available: 0,
            },
            FrameAllocatorError::NotInitialized => KernelError::NotInitialized {
                subsystem: "frame allocator",
            },
        }
    }
}

/// A usable memory region from the boot memory map, already frame-aligned.
#[derive(Debug, Clone, Copy)]
pub struct UsableRegion {
    pub start: PhysicalAddress,
    pub frame_count: usize,
}

/// Intrusive free-list node written into the first bytes of each free frame
/// through the high-half direct map.
struct FreeListNode {
    next: Option<FrameNumber>,
}

pub struct FrameAllocator {
    head: Option<FrameNumber>,
    free_count: usize,
    total_count: usize,
    /// Set once [`FrameAllocator::init`] has seeded the list.
    initialized: bool,
}

impl FrameAllocator {
    const fn new() -> Self {
        Self {
            head: None,
            free_count: 0,
            total_count: 0,
            initialized: false,
        }
    }

    /// Seed the free list from the boot memory map's usable entries.
    /// Reclaimable bootloader memory is intentionally *not* added (spec
    /// §4.1: "leave for later reclaim pass").
    pub fn init(&mut self, regions: &[UsableRegion]) {
        for region in regions {
            let start_frame = FrameNumber::from_addr(region.start);
            for i in 0..region.frame_count as u64 {
                let frame = FrameNumber::new(start_frame.0 + i);
                self.push_free(frame);
                self.total_count += 1;
            }
        }
        self.initialized = true;
    }

    fn push_free(&mut self, frame: FrameNumber) {
        let virt = crate::mm::phys_to_virt_addr(frame.addr().as_u64()) as *mut FreeListNode;
        // SAFETY: `virt` is the direct-map alias of a frame about to be
        // treated as free; no other owner may hold a reference concurrently
        // because callers only reach this via `free()` or boot-time seeding.
        unsafe {
            virt.write(FreeListNode { next: self.head });
        }
        self.head = Some(frame);
        self.free_count += 1;
    }

    /// Allocate a single frame, optionally zeroing it.
    pub fn alloc(&mut self, zero: bool) -> Result<FrameNumber, FrameAllocatorError> {
        if !self.initialized {
            return Err(FrameAllocatorError::NotInitialized);
        }
        let frame = self.head.ok_or(FrameAllocatorError::OutOfMemory)?;
        let virt = crate::mm::phys_to_virt_addr(frame.addr().as_u64()) as *const FreeListNode;
        // SAFETY: `frame` was the head of our own free list; its direct-map
        // alias still holds the `FreeListNode` written by `free`/`init`.
        let next = unsafe { (*virt).next };
        self.head = next;
        self.free_count -= 1;

        if zero {
            let dst = crate::mm::phys_to_virt_addr(frame.addr().as_u64()) as *mut u8;
            // SAFETY: `dst` points at the just-allocated frame through the
            // direct map; writing FRAME_SIZE bytes stays within the frame.
            unsafe {
                core::ptr::write_bytes(dst, 0, FRAME_SIZE);
            }
        }
        Ok(frame)
    }

    /// Allocate `count` frames, returning the first. The PFA makes no
    /// physical-contiguity guarantee across a multi-frame request (spec
    /// §4.1 is a single free list of individually addressable 4 KiB
    /// frames) -- callers that need a frame supply rather than a
    /// physically contiguous run (e.g. the ELF loader) use this.
    pub fn allocate_frames(
        &mut self,
        count: usize,
        zero: Option<bool>,
    ) -> Result<FrameNumber, FrameAllocatorError> {
        let zero = zero.unwrap_or(false);
        let first = self.alloc(zero)?;
        for _ in 1..count {
            self.alloc(zero)?;
        }
        Ok(first)
    }

    /// Return a frame to the free list.
    pub fn free(&mut self, frame: FrameNumber) {
        self.push_free(frame);
    }

    /// # Safety
    /// `frame` must currently be owned by the caller and not referenced
    /// elsewhere. Compatibility alias for arch glue predating `free`.
    pub unsafe fn free_frame(&mut self, frame: FrameNumber) {
        self.free(frame);
    }

    pub fn free_count(&self) -> usize {
        self.free_count
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }
}

lazy_static! {
    pub static ref FRAME_ALLOCATOR: Spinlock<FrameAllocator> = Spinlock::new(FrameAllocator::new());
}

static FRAMES_ALLOCATED: AtomicUsize = AtomicUsize::new(0);
static FRAMES_FREED: AtomicUsize = AtomicUsize::new(0);

/// Allocate a single physical frame. Returns `paddr = 0` on out-of-memory
/// per spec §4.1 ("`alloc` returning 0 is reserved for out-of-memory").
pub fn alloc(zero: bool) -> PhysicalAddress {
    match FRAME_ALLOCATOR.lock().alloc(zero) {
        Ok(frame) => {
            FRAMES_ALLOCATED.fetch_add(1, Ordering::Relaxed);
            frame.addr()
        }
        Err(_) => PhysicalAddress::new(0),
    }
}

/// Free a previously-allocated physical frame.
pub fn free(paddr: PhysicalAddress) {
    FRAMES_FREED.fetch_add(1, Ordering::Relaxed);
    FRAME_ALLOCATOR.lock().free(FrameNumber::from_addr(paddr));
}

pub fn stats() -> (usize, usize) {
    let alloc = FRAME_ALLOCATOR.lock();
    (alloc.free_count(), alloc.total_count())
}

/// Forwarding hooks kept for arch/bench call sites; this build has one
/// shared free list rather than a true per-CPU cache.
pub fn per_cpu_alloc_frame() -> KernelResult<FrameNumber> {
    FRAME_ALLOCATOR
        .lock()
        .alloc(false)
        .map_err(KernelError::from)
}

pub fn per_cpu_free_frame(frame: FrameNumber) -> KernelResult<()> {
    FRAME_ALLOCATOR.lock().free(frame);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_allocator(frames: usize) -> FrameAllocator {
        let mut a = FrameAllocator::new();
        a.init(&[UsableRegion {
            start: PhysicalAddress::new(0x10_0000),
            frame_count: frames,
        }]);
        a
    }

    #[test]
    fn alloc_free_roundtrip_preserves_count() {
        let mut a = seeded_allocator(4);
        assert_eq!(a.free_count(), 4);
        let f = a.alloc(false).unwrap();
        assert_eq!(a.free_count(), 3);
        a.free(f);
        assert_eq!(a.free_count(), 4);
    }

    #[test]
    fn exhaustion_is_out_of_memory() {
        let mut a = seeded_allocator(1);
        assert!(a.alloc(false).is_ok());
        assert_eq!(a.alloc(false), Err(FrameAllocatorError::OutOfMemory));
    }
}
