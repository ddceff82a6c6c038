//! Per-address-space region list (§4.3).
//!
//! A [`VirtualAddressSpace`] owns a page table root and a flat list of
//! [`Region`]s describing what's mapped where. Regions either back a fresh
//! zeroed allocation (`Anonymous`) or alias a fixed physical range
//! (`Direct`, used for MMIO and the kernel's own identity-style mappings).
//! There is no copy-on-write: `fork` deep-copies every anonymous region's
//! frames up front.

#![allow(clippy::manual_div_ceil)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::sync::Spinlock;

use super::{
    frame_allocator::FrameNumber, page_table, PageFlags, PhysicalAddress, VirtualAddress,
    FRAME_ALLOCATOR, FRAME_SIZE,
};

/// Access permissions granted to a region's mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl Protection {
    pub const NONE: Self = Self {
        read: false,
        write: false,
        exec: false,
    };
    pub const READ: Self = Self {
        read: true,
        write: false,
        exec: false,
    };
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        exec: false,
    };
    pub const READ_EXEC: Self = Self {
        read: true,
        write: false,
        exec: true,
    };
    pub const READ_WRITE_EXEC: Self = Self {
        read: true,
        write: true,
        exec: true,
    };
}

/// Caching policy for a region's mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caching {
    Default,
    Uncached,
}

/// Which privilege level may access a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Kernel,
    User,
}

/// What backs a region's pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Freshly allocated PFA frames, optionally zeroed on first touch.
    Anonymous { zeroed: bool },
    /// A fixed physical range, e.g. device MMIO.
    Direct { paddr: u64 },
}

/// Flags modifying how [`VirtualAddressSpace::map_anon`]/`map_direct`
/// interpret `hint`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapFlags {
    /// Fail instead of picking a different address if `hint` is occupied.
    pub fixed: bool,
}

/// A mapped range of virtual addresses.
///
/// `base`/`length` are both page-aligned. `frames` is empty for `Direct`
/// regions, whose pages are never PFA-owned and so are never freed by
/// `unmap`/`destroy`.
#[derive(Debug, Clone)]
struct Region {
    base: usize,
    length: usize,
    protection: Protection,
    caching: Caching,
    privilege: Privilege,
    kind: RegionKind,
    #[cfg(feature = "alloc")]
    frames: Vec<FrameNumber>,
}

impl Region {
    fn end(&self) -> usize {
        self.base + self.length
    }

    fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end()
    }

    fn overlaps(&self, base: usize, length: usize) -> bool {
        base < self.end() && base + length > self.base
    }
}

fn page_align_up(n: usize) -> usize {
    (n + FRAME_SIZE - 1) & !(FRAME_SIZE - 1)
}

/// Lower bound of the user-mappable range. Leaves the bottom page
/// unmapped so a null dereference always faults.
const USER_MIN: usize = FRAME_SIZE;
/// First address `map_anon`/`map_direct` try when no `hint` is given.
const USER_MMAP_BASE: usize = 0x4000_0000_0000;
/// Upper bound of the user-mappable range (exclusive).
const USER_MMAP_END: usize = 0x7000_0000_0000;

const DEFAULT_STACK_TOP: usize = 0x7FFF_FFFF_0000;
const DEFAULT_STACK_SIZE: usize = 8 * 1024 * 1024;

struct VasInner {
    root: Option<FrameNumber>,
    #[cfg(feature = "alloc")]
    regions: Vec<Region>,
    next_hint: usize,
    stack_top: usize,
    stack_size: usize,
}

impl VasInner {
    const fn new() -> Self {
        Self {
            root: None,
            #[cfg(feature = "alloc")]
            regions: Vec::new(),
            next_hint: USER_MMAP_BASE,
            stack_top: DEFAULT_STACK_TOP,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }

    #[cfg(feature = "alloc")]
    fn find_region(&self, addr: usize) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    #[cfg(feature = "alloc")]
    fn find_free(&self, length: usize) -> Option<usize> {
        let mut candidate = self.next_hint.max(USER_MMAP_BASE);
        loop {
            if candidate + length > USER_MMAP_END {
                return None;
            }
            match self
                .regions
                .iter()
                .find(|r| r.overlaps(candidate, length))
            {
                Some(r) => candidate = page_align_up(r.end()),
                None => return Some(candidate),
            }
        }
    }
}

/// A process's (or the kernel's, pre-scheduling) virtual address space.
///
/// All mutating methods take `&self`: callers reach this type through an
/// `Arc<VirtualAddressSpace>` (see [`crate::process::Process::address_space`])
/// and the internal spinlock gives each call exclusive access to the region
/// list and page tables for its duration. Only [`Self::init`] and
/// [`Self::destroy`], which run before the `Arc` is shared or after every
/// other reference has been dropped, need `&mut self`.
pub struct VirtualAddressSpace {
    inner: Spinlock<VasInner>,
}

impl Default for VirtualAddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualAddressSpace {
    pub const fn new() -> Self {
        Self {
            inner: Spinlock::new(VasInner::new()),
        }
    }

    /// Allocate a root page table, copying in the kernel's upper-half
    /// mappings so this address space can run kernel code the moment it's
    /// installed into CR3.
    pub fn init(&mut self) -> KernelResult<()> {
        let root = page_table::create_root_table(super::kernel_root())?;
        self.inner.lock().root = Some(root);
        Ok(())
    }

    /// Physical address of the root page table, or 0 if not yet
    /// initialized.
    pub fn get_page_table(&self) -> u64 {
        self.inner
            .lock()
            .root
            .map(|f| f.addr().as_u64())
            .unwrap_or(0)
    }

    /// Install an already-allocated root table (used by tests and by code
    /// paths that built the root table themselves).
    pub fn set_page_table(&self, root_phys: u64) {
        self.inner.lock().root = if root_phys == 0 {
            None
        } else {
            Some(FrameNumber::from_addr(PhysicalAddress::new(root_phys)))
        };
    }

    pub fn stack_top(&self) -> usize {
        self.inner.lock().stack_top
    }

    pub fn set_stack_top(&self, addr: usize) {
        self.inner.lock().stack_top = addr;
    }

    pub fn set_stack_size(&self, size: usize) {
        self.inner.lock().stack_size = size;
    }

    pub fn user_stack_size(&self) -> usize {
        self.inner.lock().stack_size
    }

    pub fn user_stack_base(&self) -> usize {
        let inner = self.inner.lock();
        inner.stack_top - inner.stack_size
    }

    /// Map `length` bytes of freshly allocated, zeroed anonymous memory.
    /// Returns the chosen base address, or `None` on exhaustion or when
    /// `flags.fixed` is set and `hint` is already occupied.
    #[cfg(feature = "alloc")]
    pub fn map_anon(
        &self,
        hint: Option<usize>,
        length: usize,
        protection: Protection,
        caching: Caching,
        flags: MapFlags,
    ) -> Option<usize> {
        let length = page_align_up(length.max(1));
        let base = self.reserve_range(hint, length, flags)?;

        let root = self.inner.lock().root?;
        let mut frames = Vec::with_capacity(length / FRAME_SIZE);
        for i in 0..length / FRAME_SIZE {
            let frame = match FRAME_ALLOCATOR.lock().alloc(true) {
                Ok(f) => f,
                Err(_) => {
                    for f in &frames {
                        FRAME_ALLOCATOR.lock().free(*f);
                    }
                    return None;
                }
            };
            let vaddr = VirtualAddress::new((base + i * FRAME_SIZE) as u64);
            if page_table::map(
                root,
                vaddr,
                frame.addr(),
                protection.write,
                protection.exec,
                true,
                matches!(caching, Caching::Uncached),
            )
            .is_err()
            {
                FRAME_ALLOCATOR.lock().free(frame);
                for f in &frames {
                    FRAME_ALLOCATOR.lock().free(*f);
                }
                return None;
            }
            frames.push(frame);
        }

        self.insert_region(Region {
            base,
            length,
            protection,
            caching,
            privilege: Privilege::User,
            kind: RegionKind::Anonymous { zeroed: true },
            frames,
        });

        Some(base)
    }

    /// Map `length` bytes at `paddr` (rounded down to a page boundary).
    /// Used for MMIO and other fixed physical ranges; never PFA-owned, so
    /// `unmap` leaves the backing memory alone.
    #[cfg(feature = "alloc")]
    pub fn map_direct(
        &self,
        hint: Option<usize>,
        length: usize,
        paddr: u64,
        protection: Protection,
        caching: Caching,
        flags: MapFlags,
    ) -> Option<usize> {
        let length = page_align_up(length.max(1));
        let base = self.reserve_range(hint, length, flags)?;
        let phys_base = paddr & !(FRAME_SIZE as u64 - 1);

        let root = self.inner.lock().root?;
        for i in 0..length / FRAME_SIZE {
            let vaddr = VirtualAddress::new((base + i * FRAME_SIZE) as u64);
            let pa = PhysicalAddress::new(phys_base + (i * FRAME_SIZE) as u64);
            if page_table::map(
                root,
                vaddr,
                pa,
                protection.write,
                protection.exec,
                true,
                matches!(caching, Caching::Uncached),
            )
            .is_err()
            {
                return None;
            }
        }

        self.insert_region(Region {
            base,
            length,
            protection,
            caching,
            privilege: Privilege::User,
            kind: RegionKind::Direct { paddr: phys_base },
            frames: Vec::new(),
        });

        Some(base)
    }

    /// Reserve `length` bytes starting at `hint` (or anywhere, if `hint` is
    /// `None`), without mapping anything yet.
    #[cfg(feature = "alloc")]
    fn reserve_range(&self, hint: Option<usize>, length: usize, flags: MapFlags) -> Option<usize> {
        let inner = self.inner.lock();
        match hint {
            Some(h) if flags.fixed => {
                let h = h & !(FRAME_SIZE - 1);
                if inner.regions.iter().any(|r| r.overlaps(h, length)) {
                    None
                } else {
                    Some(h)
                }
            }
            Some(h) => {
                let h = h & !(FRAME_SIZE - 1);
                if h >= USER_MIN
                    && h + length <= USER_MMAP_END
                    && !inner.regions.iter().any(|r| r.overlaps(h, length))
                {
                    Some(h)
                } else {
                    inner.find_free(length)
                }
            }
            None => inner.find_free(length),
        }
    }

    #[cfg(feature = "alloc")]
    fn insert_region(&self, region: Region) {
        let mut inner = self.inner.lock();
        inner.next_hint = page_align_up(region.end());
        inner.regions.push(region);
    }

    /// Unmap `[vaddr, vaddr + length)`, splitting any region that straddles
    /// either boundary. Frees PFA-owned frames for anonymous pages in the
    /// unmapped range; `Direct` pages are left backing their physical
    /// memory.
    #[cfg(feature = "alloc")]
    pub fn unmap(&self, vaddr: usize, length: usize) -> KernelResult<()> {
        let length = page_align_up(length.max(1));
        let end = vaddr + length;
        let mut inner = self.inner.lock();
        let root = inner.root.ok_or(KernelError::InvalidState {
            expected: "initialized address space",
            actual: "no root page table",
        })?;

        let mut kept = Vec::with_capacity(inner.regions.len());
        let mut to_unmap: Vec<Region> = Vec::new();
        for region in core::mem::take(&mut inner.regions) {
            if !region.overlaps(vaddr, length) {
                kept.push(region);
                continue;
            }

            let (before, middle, after) = split_region(region, vaddr, end);
            if let Some(b) = before {
                kept.push(b);
            }
            if let Some(a) = after {
                kept.push(a);
            }
            if let Some(m) = middle {
                to_unmap.push(m);
            }
        }
        inner.regions = kept;

        for region in to_unmap {
            for i in 0..region.length / FRAME_SIZE {
                let va = VirtualAddress::new((region.base + i * FRAME_SIZE) as u64);
                if let Some(paddr) = page_table::unmap(root, va) {
                    if matches!(region.kind, RegionKind::Anonymous { .. }) {
                        FRAME_ALLOCATOR.lock().free(FrameNumber::from_addr(paddr));
                    }
                }
            }
        }

        Ok(())
    }

    /// Change the protection of every page in `[vaddr, vaddr + length)`.
    /// Every byte in the range must already belong to a mapped region.
    #[cfg(feature = "alloc")]
    pub fn mprotect(&self, vaddr: usize, length: usize, protection: Protection) -> KernelResult<()> {
        let length = page_align_up(length.max(1));
        let end = vaddr + length;
        let mut inner = self.inner.lock();
        let root = inner.root.ok_or(KernelError::InvalidState {
            expected: "initialized address space",
            actual: "no root page table",
        })?;

        if !range_fully_covered(&inner.regions, vaddr, end) {
            return Err(KernelError::InvalidArgument {
                name: "vaddr",
                value: "mprotect on unmapped range",
            });
        }

        for region in inner.regions.iter_mut().filter(|r| r.overlaps(vaddr, length)) {
            let lo = region.base.max(vaddr);
            let hi = region.end().min(end);
            for page in (lo..hi).step_by(FRAME_SIZE) {
                page_table::protect(root, VirtualAddress::new(page as u64), protection.write, protection.exec)?;
            }
            if lo == region.base && hi == region.end() {
                region.protection = protection;
            }
        }

        Ok(())
    }

    /// Look up the region containing `vaddr`, if any.
    #[cfg(feature = "alloc")]
    pub fn find_mapping(&self, vaddr: usize) -> Option<(usize, usize)> {
        self.inner
            .lock()
            .find_region(vaddr)
            .map(|r| (r.base, r.length))
    }

    /// Copy `src` into this address space starting at `dst_vaddr`. Stops
    /// (returning the number of bytes actually copied) at the first
    /// unmapped page.
    #[cfg(feature = "alloc")]
    pub fn copy_to(&self, dst_vaddr: usize, src: &[u8]) -> usize {
        let root = match self.inner.lock().root {
            Some(r) => r,
            None => return 0,
        };
        let mut copied = 0;
        while copied < src.len() {
            let vaddr = dst_vaddr + copied;
            let page_off = vaddr & (FRAME_SIZE - 1);
            let chunk = (FRAME_SIZE - page_off).min(src.len() - copied);
            let paddr = match page_table::virt_to_phys(root, VirtualAddress::new(vaddr as u64)) {
                Some(p) => p,
                None => break,
            };
            let dst = super::phys_to_virt_addr(paddr.as_u64()) as *mut u8;
            // SAFETY: `paddr` is a currently-mapped physical page reached
            // through the kernel's direct map; `chunk` keeps the write
            // inside that single page.
            unsafe {
                core::ptr::copy_nonoverlapping(src.as_ptr().add(copied), dst, chunk);
            }
            copied += chunk;
        }
        copied
    }

    /// Copy out of this address space starting at `src_vaddr`, mirroring
    /// [`Self::copy_to`].
    #[cfg(feature = "alloc")]
    pub fn copy_from(&self, dst: &mut [u8], src_vaddr: usize) -> usize {
        let root = match self.inner.lock().root {
            Some(r) => r,
            None => return 0,
        };
        let mut copied = 0;
        while copied < dst.len() {
            let vaddr = src_vaddr + copied;
            let page_off = vaddr & (FRAME_SIZE - 1);
            let chunk = (FRAME_SIZE - page_off).min(dst.len() - copied);
            let paddr = match page_table::virt_to_phys(root, VirtualAddress::new(vaddr as u64)) {
                Some(p) => p,
                None => break,
            };
            let src = super::phys_to_virt_addr(paddr.as_u64()) as *const u8;
            // SAFETY: same reasoning as `copy_to`, reversed direction.
            unsafe {
                core::ptr::copy_nonoverlapping(src, dst.as_mut_ptr().add(copied), chunk);
            }
            copied += chunk;
        }
        copied
    }

    /// Zero `len` bytes starting at `dst_vaddr`. Used for ELF BSS.
    #[cfg(feature = "alloc")]
    pub fn write_zeroes(&self, dst_vaddr: usize, len: usize) -> usize {
        let root = match self.inner.lock().root {
            Some(r) => r,
            None => return 0,
        };
        let mut done = 0;
        while done < len {
            let vaddr = dst_vaddr + done;
            let page_off = vaddr & (FRAME_SIZE - 1);
            let chunk = (FRAME_SIZE - page_off).min(len - done);
            let paddr = match page_table::virt_to_phys(root, VirtualAddress::new(vaddr as u64)) {
                Some(p) => p,
                None => break,
            };
            let dst = super::phys_to_virt_addr(paddr.as_u64()) as *mut u8;
            // SAFETY: same reasoning as `copy_to`.
            unsafe {
                core::ptr::write_bytes(dst, 0, chunk);
            }
            done += chunk;
        }
        done
    }

    /// Map a single fresh page at `vaddr` with raw page table flags.
    /// Convenience wrapper for callers (ELF loader, stack setup) that think
    /// in terms of individual pages rather than whole regions; the page
    /// still belongs to an anonymous region so `destroy`/`fork` see it.
    #[cfg(feature = "alloc")]
    pub fn map_page(&self, vaddr: usize, flags: PageFlags) -> KernelResult<()> {
        let root = self.inner.lock().root.ok_or(KernelError::InvalidState {
            expected: "initialized address space",
            actual: "no root page table",
        })?;

        let frame = FRAME_ALLOCATOR.lock().alloc(true).map_err(KernelError::from)?;
        let vaddr_aligned = vaddr & !(FRAME_SIZE - 1);
        let result = page_table::map(
            root,
            VirtualAddress::new(vaddr_aligned as u64),
            frame.addr(),
            flags.contains(PageFlags::WRITABLE),
            !flags.contains(PageFlags::NO_EXECUTE),
            flags.contains(PageFlags::USER),
            flags.contains(PageFlags::NO_CACHE),
        );
        if result.is_err() {
            FRAME_ALLOCATOR.lock().free(frame);
            return result;
        }

        let protection = Protection {
            read: true,
            write: flags.contains(PageFlags::WRITABLE),
            exec: !flags.contains(PageFlags::NO_EXECUTE),
        };
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .regions
            .iter_mut()
            .find(|r| r.end() == vaddr_aligned && matches!(r.kind, RegionKind::Anonymous { .. }))
        {
            existing.length += FRAME_SIZE;
            existing.frames.push(frame);
        } else {
            inner.regions.push(Region {
                base: vaddr_aligned,
                length: FRAME_SIZE,
                protection,
                caching: Caching::Default,
                privilege: Privilege::User,
                kind: RegionKind::Anonymous { zeroed: true },
                frames: alloc::vec![frame],
            });
        }

        Ok(())
    }

    /// Deep-copy every region into a brand-new address space. No
    /// copy-on-write: anonymous regions get fresh frames with their
    /// contents copied byte for byte.
    #[cfg(feature = "alloc")]
    pub fn fork(&self) -> KernelResult<VirtualAddressSpace> {
        let child = VirtualAddressSpace::new();
        {
            let root = page_table::create_root_table(super::kernel_root())?;
            child.inner.lock().root = Some(root);
        }

        // Snapshot everything up front rather than holding `self.inner`'s
        // lock across the loop below: `self.copy_from` re-locks it.
        let (stack_top, stack_size, regions) = {
            let inner = self.inner.lock();
            (inner.stack_top, inner.stack_size, inner.regions.clone())
        };
        {
            let mut child_inner = child.inner.lock();
            child_inner.stack_top = stack_top;
            child_inner.stack_size = stack_size;
        }

        for region in &regions {
            match region.kind {
                RegionKind::Anonymous { .. } => {
                    let base = child
                        .map_anon(
                            Some(region.base),
                            region.length,
                            region.protection,
                            region.caching,
                            MapFlags { fixed: true },
                        )
                        .ok_or(KernelError::OutOfMemory {
                            requested: region.length,
                            available: 0,
                        })?;
                    let mut buf = alloc::vec![0u8; region.length];
                    let n = self.copy_from(&mut buf, region.base);
                    child.copy_to(base, &buf[..n]);
                }
                RegionKind::Direct { paddr } => {
                    child
                        .map_direct(
                            Some(region.base),
                            region.length,
                            paddr,
                            region.protection,
                            region.caching,
                            MapFlags { fixed: true },
                        )
                        .ok_or(KernelError::OutOfMemory {
                            requested: region.length,
                            available: 0,
                        })?;
                }
            }
        }

        Ok(child)
    }

    /// Free every mapped frame and the root page table itself. Safe to
    /// call more than once; a no-op after the first call.
    pub fn destroy(&mut self) {
        let mut inner = self.inner.lock();
        let root = match inner.root.take() {
            Some(r) => r,
            None => return,
        };

        #[cfg(feature = "alloc")]
        for region in core::mem::take(&mut inner.regions) {
            for i in 0..region.length / FRAME_SIZE {
                let va = VirtualAddress::new((region.base + i * FRAME_SIZE) as u64);
                if let Some(paddr) = page_table::unmap(root, va) {
                    if matches!(region.kind, RegionKind::Anonymous { .. }) {
                        FRAME_ALLOCATOR.lock().free(FrameNumber::from_addr(paddr));
                    }
                }
            }
        }

        FRAME_ALLOCATOR.lock().free(root);
        crate::arch::tlb_flush_all();
    }
}

#[cfg(feature = "alloc")]
fn split_region(region: Region, cut_start: usize, cut_end: usize) -> (Option<Region>, Option<Region>, Option<Region>) {
    let (lo, hi) = (region.base, region.end());
    let cut_start = cut_start.max(lo);
    let cut_end = cut_end.min(hi);

    let before = (cut_start > lo).then(|| Region {
        base: lo,
        length: cut_start - lo,
        protection: region.protection,
        caching: region.caching,
        privilege: region.privilege,
        kind: region.kind,
        frames: region
            .frames
            .iter()
            .take((cut_start - lo) / FRAME_SIZE)
            .copied()
            .collect(),
    });

    let after = (cut_end < hi).then(|| Region {
        base: cut_end,
        length: hi - cut_end,
        protection: region.protection,
        caching: region.caching,
        privilege: region.privilege,
        kind: region.kind,
        frames: region
            .frames
            .iter()
            .skip((cut_end - lo) / FRAME_SIZE)
            .copied()
            .collect(),
    });

    let middle = Some(Region {
        base: cut_start,
        length: cut_end - cut_start,
        protection: region.protection,
        caching: region.caching,
        privilege: region.privilege,
        kind: region.kind,
        frames: region
            .frames
            .iter()
            .skip((cut_start - lo) / FRAME_SIZE)
            .take((cut_end - cut_start) / FRAME_SIZE)
            .copied()
            .collect(),
    });

    (before, middle, after)
}

#[cfg(feature = "alloc")]
fn range_fully_covered(regions: &[Region], start: usize, end: usize) -> bool {
    let mut cursor = start;
    while cursor < end {
        match regions.iter().find(|r| r.contains(cursor)) {
            Some(r) => cursor = r.end().min(end),
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protection_constants_are_distinct() {
        assert_ne!(Protection::READ, Protection::READ_WRITE);
        assert!(Protection::READ_WRITE.write);
        assert!(!Protection::READ.write);
    }

    #[test]
    fn page_align_rounds_up() {
        assert_eq!(page_align_up(1), FRAME_SIZE);
        assert_eq!(page_align_up(FRAME_SIZE), FRAME_SIZE);
        assert_eq!(page_align_up(FRAME_SIZE + 1), FRAME_SIZE * 2);
    }

    #[test]
    fn vas_default_stack_layout() {
        let vas = VirtualAddressSpace::new();
        assert_eq!(vas.stack_top(), DEFAULT_STACK_TOP);
        assert_eq!(vas.user_stack_size(), DEFAULT_STACK_SIZE);
        assert_eq!(vas.user_stack_base(), DEFAULT_STACK_TOP - DEFAULT_STACK_SIZE);
    }

    #[test]
    fn set_stack_top_persists() {
        let vas = VirtualAddressSpace::new();
        vas.set_stack_top(0x7000_0000_0000);
        assert_eq!(vas.stack_top(), 0x7000_0000_0000);
    }

    #[test]
    fn get_page_table_defaults_to_zero() {
        let vas = VirtualAddressSpace::new();
        assert_eq!(vas.get_page_table(), 0);
        vas.set_page_table(0x1234_0000);
        assert_eq!(vas.get_page_table(), 0x1234_0000);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn region_split_keeps_outer_pieces() {
        let region = Region {
            base: 0x1000,
            length: 0x4000,
            protection: Protection::READ_WRITE,
            caching: Caching::Default,
            privilege: Privilege::User,
            kind: RegionKind::Anonymous { zeroed: true },
            frames: Vec::new(),
        };
        let (before, middle, after) = split_region(region, 0x2000, 0x3000);
        assert_eq!(before.unwrap().base, 0x1000);
        assert_eq!(middle.unwrap().base, 0x2000);
        assert_eq!(after.unwrap().base, 0x3000);
    }
}
