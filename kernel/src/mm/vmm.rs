//! Virtual memory manager.
//!
//! A single self-referencing page directory per address space: the last
//! PDE (1023) points back at the directory's own frame, so the whole
//! directory is addressable as a page table at [`PAGE_DIR_VADDR`], and
//! every page table in the system is addressable as flat PTE arrays
//! starting at [`PAGE_TABS_VADDR`]. [`super::super::arch::x86::boot`] sets
//! this up for the boot address space before Rust code ever runs.

use super::{frame_allocator, PAGE_SIZE};
use crate::arch::x86;

/// First virtual address of the kernel half of every address space.
pub const KERNEL_VAS_START: usize = 0xC000_0000;

const PTE_NUM: usize = 1024;
const PDE_NUM: usize = 1024;
const PAGE_TABS_VADDR: usize = 0xFFC0_0000;
const PAGE_DIR_VADDR: usize = 0xFFFF_F000;
const SELFREF_PDE: usize = 1023;

const PDE_PRESENT: u32 = 1 << 0;
const PDE_RW: u32 = 1 << 1;
const PDE_USER: u32 = 1 << 2;
const PTE_PRESENT: u32 = 1 << 0;
const PTE_RW: u32 = 1 << 1;
const PTE_USER: u32 = 1 << 2;
const ADDR_MASK: u32 = 0xFFFF_F000;

fn pagedir() -> &'static mut [u32; PDE_NUM] {
    // SAFETY: PAGE_DIR_VADDR is the self-reference alias, always mapped
    // once paging is on.
    unsafe { &mut *(PAGE_DIR_VADDR as *mut [u32; PDE_NUM]) }
}

fn pagetabs() -> *mut u32 {
    PAGE_TABS_VADDR as *mut u32
}

const fn pde_index(addr: usize) -> usize {
    addr / (PAGE_SIZE * PTE_NUM)
}

const fn pte_index(addr: usize) -> usize {
    addr / PAGE_SIZE
}

pub fn init() {
    println!("[VMM] Self-referencing page directory at 0x{PAGE_DIR_VADDR:x}");
}

/// Maps `n` contiguous pages from `paddr` to `vaddr`, allocating any page
/// tables that do not yet exist. Both addresses must already be page
/// aligned. Returns `false` if a new page table was needed and physical
/// memory ran out; pages mapped before the failure stay mapped.
pub fn map(paddr: usize, vaddr: usize, n: usize) -> bool {
    for page in 0..n {
        let page_vaddr = vaddr + page * PAGE_SIZE;
        let page_paddr = paddr + page * PAGE_SIZE;
        let pde = pde_index(page_vaddr);
        let user = page_vaddr < KERNEL_VAS_START;

        if pagedir()[pde] & PDE_PRESENT == 0 {
            let Some(pt_phys) = frame_allocator::alloc() else {
                return false;
            };
            let mut flags = pt_phys as u32 | PDE_PRESENT | PDE_RW;
            if user {
                flags |= PDE_USER;
            }
            pagedir()[pde] = flags;
            x86::tlb_flush_address((pde * PTE_NUM * PAGE_SIZE) as u32);
            // SAFETY: the page table is freshly allocated and must start
            // zeroed (all entries not-present) before use.
            unsafe {
                core::ptr::write_bytes(pagetabs().add(pde * PTE_NUM), 0, PTE_NUM);
            }
        } else if user {
            pagedir()[pde] |= PDE_USER;
        }

        let idx = pte_index(page_vaddr);
        let entry = unsafe { &mut *pagetabs().add(idx) };
        assert!(*entry & PTE_PRESENT == 0, "page already mapped at 0x{page_vaddr:x}");
        *entry = page_paddr as u32 | PTE_PRESENT | PTE_RW | if user { PTE_USER } else { 0 };
        x86::tlb_flush_address(page_vaddr as u32);
    }
    true
}

/// Clears `n` contiguous PTEs starting at `vaddr` without reclaiming any
/// page table left entirely empty; see [`unmap`] for the with-free variant.
pub fn unmap_nofree(vaddr: usize, n: usize) {
    for page in 0..n {
        let page_vaddr = vaddr + page * PAGE_SIZE;
        let idx = pte_index(page_vaddr);
        let entry = unsafe { &mut *pagetabs().add(idx) };
        assert!(*entry & PTE_PRESENT != 0, "page not mapped at 0x{page_vaddr:x}");
        *entry = 0;
        x86::tlb_flush_address(page_vaddr as u32);
    }
}

/// Unmaps `n` contiguous pages starting at `vaddr`, freeing any page table
/// left entirely empty.
pub fn unmap(vaddr: usize, n: usize) {
    unmap_nofree(vaddr, n);

    let start_pde = pde_index(vaddr);
    let end_pde = pde_index(vaddr + (n - 1).max(0) * PAGE_SIZE) + 1;
    for pde in start_pde..end_pde {
        if pagedir()[pde] & PDE_PRESENT == 0 {
            continue;
        }
        if page_table_unused(pde) {
            let pt_phys = (pagedir()[pde] & ADDR_MASK) as usize;
            frame_allocator::free(pt_phys);
            pagedir()[pde] = 0;
        }
    }
}

fn page_table_unused(pde: usize) -> bool {
    (pde * PTE_NUM..(pde + 1) * PTE_NUM)
        .all(|idx| unsafe { *pagetabs().add(idx) } & PTE_PRESENT == 0)
}

/// Finds `n` contiguous free pages anywhere in the kernel half of the
/// address space, allocating page tables along the way as needed, and
/// returns the first page's virtual address.
pub fn palloc_k(n: usize) -> Option<usize> {
    find_free_run_k(n)
}

fn find_free_run_k(n: usize) -> Option<usize> {
    let mut run = 0usize;
    let mut start = 0usize;
    for pde in (KERNEL_VAS_START / (PAGE_SIZE * PTE_NUM))..PDE_NUM - 1 {
        if pagedir()[pde] & PDE_PRESENT == 0 {
            if run == 0 {
                start = pde * PTE_NUM * PAGE_SIZE;
            }
            run += PTE_NUM;
            if run >= n {
                return Some(start);
            }
            continue;
        }
        for pte in 0..PTE_NUM {
            let idx = pde * PTE_NUM + pte;
            if unsafe { *pagetabs().add(idx) } & PTE_PRESENT != 0 {
                run = 0;
                continue;
            }
            if run == 0 {
                start = idx * PAGE_SIZE;
            }
            run += 1;
            if run >= n {
                return Some(start);
            }
        }
    }
    None
}

/// Allocates `n` fresh physical frames and maps them at a freshly found
/// kernel virtual range, returning that range's start address.
pub fn alloc_map_k(n: usize) -> Option<usize> {
    let vaddr = palloc_k(n)?;
    for page in 0..n {
        let phys = frame_allocator::alloc()?;
        if !map(phys, vaddr + page * PAGE_SIZE, 1) {
            return None;
        }
    }
    Some(vaddr)
}

/// Maps an arbitrary (not necessarily page-aligned) physical range of
/// `size` bytes starting at `paddr` into a freshly chosen kernel virtual
/// address, preserving the offset of `paddr` within its page. Returns the
/// virtual address corresponding to `paddr` itself.
pub fn map_range_anyk(paddr: usize, size: usize) -> Option<usize> {
    let page_off = paddr % PAGE_SIZE;
    let aligned_paddr = paddr - page_off;
    let n = (page_off + size).div_ceil(PAGE_SIZE);

    let vaddr = palloc_k(n)?;
    for page in 0..n {
        if !map(aligned_paddr + page * PAGE_SIZE, vaddr + page * PAGE_SIZE, 1) {
            return None;
        }
    }
    Some(vaddr + page_off)
}

/// Physical address backing `vaddr`, if any page table and page are
/// present there.
pub fn get_phys(vaddr: usize) -> Option<usize> {
    if pagedir()[pde_index(vaddr)] & PDE_PRESENT == 0 {
        return None;
    }
    let entry = unsafe { *pagetabs().add(pte_index(vaddr)) };
    if entry & PTE_PRESENT == 0 {
        return None;
    }
    Some((entry & ADDR_MASK) as usize)
}

/// True if `[addr, addr+len)` lies entirely in the user half of the
/// address space. Does not check that it is actually mapped; see
/// [`validate_user_ptr_mapped`] for that.
pub fn validate_user_ptr(addr: usize, len: usize) -> bool {
    match addr.checked_add(len) {
        Some(end) => end <= KERNEL_VAS_START,
        None => false,
    }
}

/// As [`validate_user_ptr`], but also requires every page in the range to
/// be present.
pub fn validate_user_ptr_mapped(addr: usize, len: usize) -> bool {
    if !validate_user_ptr(addr, len) {
        return false;
    }
    if len == 0 {
        return true;
    }
    let start_page = addr / PAGE_SIZE;
    let end_page = (addr + len - 1) / PAGE_SIZE;
    (start_page..=end_page).all(|p| get_phys(p * PAGE_SIZE).is_some())
}

/// Creates a new address space: a fresh page directory sharing the
/// current kernel-half mappings and self-referencing itself at PDE 1023.
/// Returns its physical address.
pub fn new_vas() -> Option<usize> {
    let phys = frame_allocator::alloc()?;
    let scratch = alloc_map_k_one(phys)?;

    let new_pd = unsafe { &mut *(scratch as *mut [u32; PDE_NUM]) };
    new_pd.fill(0);
    let kernel_pde_start = KERNEL_VAS_START / (PAGE_SIZE * PTE_NUM);
    let cur = pagedir();
    new_pd[kernel_pde_start..SELFREF_PDE].copy_from_slice(&cur[kernel_pde_start..SELFREF_PDE]);
    new_pd[SELFREF_PDE] = phys as u32 | PDE_PRESENT | PDE_RW;

    unmap(scratch, 1);
    Some(phys)
}

/// Maps an already-allocated frame at a fresh kernel address, for the
/// brief window needed to initialize it before it becomes a live VAS.
fn alloc_map_k_one(phys: usize) -> Option<usize> {
    let vaddr = palloc_k(1)?;
    if map(phys, vaddr, 1) {
        Some(vaddr)
    } else {
        None
    }
}

/// Frees every mapped page and page table in the user half of the
/// *currently active* address space. Must run before switching away from
/// it, since it walks the live self-reference mapping.
pub fn destroy_uvas() {
    let user_pde_end = KERNEL_VAS_START / (PAGE_SIZE * PTE_NUM);
    for pde in 0..user_pde_end {
        if pagedir()[pde] & PDE_PRESENT == 0 {
            continue;
        }
        for pte in pde * PTE_NUM..(pde + 1) * PTE_NUM {
            let entry = unsafe { *pagetabs().add(pte) };
            if entry & PTE_PRESENT != 0 {
                frame_allocator::free((entry & ADDR_MASK) as usize);
            }
        }
        let pt_phys = (pagedir()[pde] & ADDR_MASK) as usize;
        frame_allocator::free(pt_phys);
        pagedir()[pde] = 0;
    }
    x86::tlb_flush_all();
}

/// Frees the page directory frame of a VAS that is no longer active and
/// whose user half has already been torn down via [`destroy_uvas`].
pub fn delete_vas(phys_pagedir: usize) {
    frame_allocator::free(phys_pagedir);
}

/// Switches the active address space to `phys_pagedir`.
pub fn switch_vas(phys_pagedir: usize) {
    // SAFETY: every VAS created by `new_vas` shares the current kernel
    // half mapping, so code and data the kernel depends on stay mapped.
    unsafe {
        x86::load_cr3(phys_pagedir as u32);
    }
}

/// Physical address of the active page directory.
pub fn cur_vas() -> usize {
    x86::current_cr3() as usize
}
