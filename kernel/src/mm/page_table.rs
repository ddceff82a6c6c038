//! 4-level x86-64 Page Table Manager (§4.2).
//!
//! Each address space is rooted at a physical frame holding a PML4. Walking
//! down to PDPT/PD/PT allocates and zeroes intermediate tables on demand.
//! Table frames are dereferenced through the high-half direct map, never
//! identity-mapped.

#![allow(dead_code)]

use core::ops::{Index, IndexMut};

use super::{FrameNumber, PageFlags, PhysicalAddress, VirtualAddress, FRAME_ALLOCATOR};
use crate::error::{KernelError, KernelResult};

pub const PAGE_TABLE_ENTRIES: usize = 512;

/// A single page table entry.
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

impl PageTableEntry {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_unused(&self) -> bool {
        self.0 == 0
    }

    pub const fn is_present(&self) -> bool {
        self.0 & PageFlags::PRESENT.0 != 0
    }

    pub fn frame(&self) -> Option<FrameNumber> {
        self.is_present()
            .then(|| FrameNumber::new((self.0 & ADDR_MASK) >> 12))
    }

    pub fn flags(&self) -> PageFlags {
        PageFlags(self.0 & !ADDR_MASK)
    }

    pub fn set(&mut self, frame: FrameNumber, flags: PageFlags) {
        self.0 = (frame.as_u64() << 12) | flags.0;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// One level of the paging hierarchy: 512 entries, exactly one physical
/// frame.
#[repr(align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; PAGE_TABLE_ENTRIES],
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;
    fn index(&self, i: usize) -> &PageTableEntry {
        &self.entries[i]
    }
}

impl IndexMut<usize> for PageTable {
    fn index_mut(&mut self, i: usize) -> &mut PageTableEntry {
        &mut self.entries[i]
    }
}

fn table_at(frame: FrameNumber) -> &'static mut PageTable {
    let virt = super::phys_to_virt_addr(frame.addr().as_u64());
    // SAFETY: `frame` is a page-table frame owned by an address space;
    // callers hold that address space's page-table lock for the duration.
    unsafe { &mut *(virt as *mut PageTable) }
}

fn pml4_index(vaddr: u64) -> usize {
    ((vaddr >> 39) & 0x1FF) as usize
}
fn pdpt_index(vaddr: u64) -> usize {
    ((vaddr >> 30) & 0x1FF) as usize
}
fn pd_index(vaddr: u64) -> usize {
    ((vaddr >> 21) & 0x1FF) as usize
}
fn pt_index(vaddr: u64) -> usize {
    ((vaddr >> 12) & 0x1FF) as usize
}

fn alloc_table_frame() -> KernelResult<FrameNumber> {
    FRAME_ALLOCATOR
        .lock()
        .alloc(true)
        .map_err(KernelError::from)
}

/// Walk from `root` down to the level-1 (PT) entry for `vaddr`, allocating
/// intermediate tables as needed. `user` marks every intermediate entry as
/// accessible from user mode if any descendant mapping will be.
fn walk_create(root: FrameNumber, vaddr: u64, user: bool) -> KernelResult<(FrameNumber, usize)> {
    let mut table_frame = root;
    for shift_fn in [
        pml4_index as fn(u64) -> usize,
        pdpt_index as fn(u64) -> usize,
        pd_index as fn(u64) -> usize,
    ] {
        let idx = shift_fn(vaddr);
        let table = table_at(table_frame);
        if !table[idx].is_present() {
            let new_frame = alloc_table_frame()?;
            let mut flags = PageFlags::PRESENT | PageFlags::WRITABLE;
            if user {
                flags |= PageFlags::USER;
            }
            table[idx].set(new_frame, flags);
        } else if user && !table[idx].flags().contains(PageFlags::USER) {
            let frame = table[idx].frame().unwrap();
            let flags = table[idx].flags() | PageFlags::USER;
            table[idx].set(frame, flags);
        }
        table_frame = table[idx].frame().unwrap();
    }
    Ok((table_frame, pt_index(vaddr)))
}

/// Install a single 4 KiB mapping in the address space rooted at `root`.
/// `priv_user` selects whether the leaf (and any newly created ancestor
/// tables) are marked `U`.
#[allow(clippy::too_many_arguments)]
pub fn map(
    root: FrameNumber,
    vaddr: VirtualAddress,
    paddr: PhysicalAddress,
    prot_write: bool,
    prot_exec: bool,
    priv_user: bool,
    cache_disable: bool,
) -> KernelResult<()> {
    let (pt_frame, idx) = walk_create(root, vaddr.as_u64(), priv_user)?;
    let pt = table_at(pt_frame);

    let mut flags = PageFlags::PRESENT;
    if prot_write {
        flags |= PageFlags::WRITABLE;
    }
    if priv_user {
        flags |= PageFlags::USER;
    }
    if cache_disable {
        flags |= PageFlags::NO_CACHE;
    }
    if !prot_exec {
        flags |= PageFlags::NO_EXECUTE;
    }

    pt[idx].set(FrameNumber::from_addr(paddr), flags);
    invalidate(vaddr);
    Ok(())
}

/// Remove the mapping for `vaddr`, returning the physical address that was
/// mapped (if any). Intermediate tables are left in place even if they
/// become entirely empty; reclaiming empty page-table levels is not
/// required by the spec.
pub fn unmap(root: FrameNumber, vaddr: VirtualAddress) -> Option<PhysicalAddress> {
    let (pt_frame, idx) = leaf_entry(root, vaddr.as_u64())?;
    let pt = table_at(pt_frame);
    let paddr = pt[idx].frame().map(|f| f.addr());
    pt[idx].clear();
    invalidate(vaddr);
    paddr
}

/// Look up the physical address `vaddr` currently maps to, without
/// mutating anything or allocating missing intermediate tables.
pub fn virt_to_phys(root: FrameNumber, vaddr: VirtualAddress) -> Option<PhysicalAddress> {
    let (pt_frame, idx) = leaf_entry(root, vaddr.as_u64())?;
    let pt = table_at(pt_frame);
    pt[idx]
        .frame()
        .map(|f| PhysicalAddress::new(f.addr().as_u64() | (vaddr.as_u64() & 0xFFF)))
}

/// Update the protection flags of an existing mapping.
pub fn protect(
    root: FrameNumber,
    vaddr: VirtualAddress,
    prot_write: bool,
    prot_exec: bool,
) -> KernelResult<()> {
    let (pt_frame, idx) = leaf_entry(root, vaddr.as_u64()).ok_or(KernelError::InvalidArgument {
        name: "vaddr",
        value: "mprotect on unmapped page",
    })?;
    let pt = table_at(pt_frame);
    let frame = pt[idx].frame().ok_or(KernelError::InvalidArgument {
        name: "vaddr",
        value: "mprotect on unmapped page",
    })?;
    let mut flags = pt[idx].flags();
    if prot_write {
        flags |= PageFlags::WRITABLE;
    } else {
        flags = PageFlags(flags.0 & !PageFlags::WRITABLE.0);
    }
    if prot_exec {
        flags = PageFlags(flags.0 & !PageFlags::NO_EXECUTE.0);
    } else {
        flags |= PageFlags::NO_EXECUTE;
    }
    pt[idx].set(frame, flags);
    invalidate(vaddr);
    Ok(())
}

/// Walk down to the level-1 table without creating missing levels.
fn leaf_entry(root: FrameNumber, vaddr: u64) -> Option<(FrameNumber, usize)> {
    let mut table_frame = root;
    for shift_fn in [
        pml4_index as fn(u64) -> usize,
        pdpt_index as fn(u64) -> usize,
        pd_index as fn(u64) -> usize,
    ] {
        let idx = shift_fn(vaddr);
        let table = table_at(table_frame);
        if !table[idx].is_present() {
            return None;
        }
        table_frame = table[idx].frame().unwrap();
    }
    Some((table_frame, pt_index(vaddr)))
}

fn invalidate(vaddr: VirtualAddress) {
    crate::arch::tlb_flush_address(vaddr.as_u64());
}

/// Allocate a fresh root table frame with the kernel's upper-half (PML4
/// indices 256..512) copied in, so every address space shares kernel
/// mappings.
pub fn create_root_table(kernel_root: Option<FrameNumber>) -> KernelResult<FrameNumber> {
    let root = alloc_table_frame()?;
    if let Some(kroot) = kernel_root {
        let kernel_table = table_at(kroot);
        let new_table = table_at(root);
        for i in 256..PAGE_TABLE_ENTRIES {
            new_table[i] = kernel_table[i];
        }
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_split_matches_shifts() {
        let v = 0x0000_7F12_3456_7890u64;
        assert_eq!(pml4_index(v), ((v >> 39) & 0x1FF) as usize);
        assert_eq!(pdpt_index(v), ((v >> 30) & 0x1FF) as usize);
        assert_eq!(pd_index(v), ((v >> 21) & 0x1FF) as usize);
        assert_eq!(pt_index(v), ((v >> 12) & 0x1FF) as usize);
    }
}
