//! Multiboot v1 header and boot information parsing.
//!
//! The header lives in the `.multiboot` link section (see `link.ld`) so it
//! sits inside the first 8 KiB of the image, where GRUB and QEMU's direct
//! kernel loader scan for it.

use core::arch::global_asm;

pub const MULTIBOOT_MAGIC: u32 = 0x1BADB002;
const MULTIBOOT_FLAGS: u32 = 0x0000_0003; // align modules on page boundaries, request mem map

global_asm!(
    r#"
.section .multiboot, "a"
.align 4
.long {magic}
.long {flags}
.long -({magic} + {flags})
"#,
    magic = const MULTIBOOT_MAGIC,
    flags = const MULTIBOOT_FLAGS,
);

const FLAG_MEM: u32 = 1 << 0;
const FLAG_MMAP: u32 = 1 << 6;
const MAX_MEMORY_REGIONS: usize = 32;

/// One usable-memory entry reported by the bootloader's memory map.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
}

/// Parsed subset of the Multiboot information structure: only what the
/// frame allocator needs to seed itself. `repr(C)` so it can cross the
/// `extern "C"` boundary into a test binary's entry hook unchanged.
#[repr(C)]
pub struct BootInfo {
    pub mem_lower_kib: u32,
    pub mem_upper_kib: u32,
    pub regions: [MemoryRegion; MAX_MEMORY_REGIONS],
    pub region_count: usize,
}

#[repr(C)]
struct MultibootInfo {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
    boot_device: u32,
    cmdline: u32,
    mods_count: u32,
    mods_addr: u32,
    syms: [u32; 4],
    mmap_length: u32,
    mmap_addr: u32,
}

#[repr(C, packed)]
struct MmapEntry {
    size: u32,
    base_addr: u64,
    length: u64,
    entry_type: u32,
}

const MMAP_TYPE_AVAILABLE: u32 = 1;

/// Reads the Multiboot info structure at `info_addr`, validating `magic`
/// against the value the loader must have passed in EAX.
///
/// # Safety
/// `info_addr` must be the physical address the bootloader passed in EBX,
/// still mapped and unmodified since boot.
pub unsafe fn parse(magic: u32, info_addr: u32) -> BootInfo {
    assert_eq!(magic, 0x2BADB002, "not loaded by a Multiboot v1 bootloader");

    // SAFETY: `info_addr` is bootloader-supplied and identity-mapped this
    // early in boot, per the caller contract.
    let info = unsafe { &*(info_addr as *const MultibootInfo) };

    let mut regions = [MemoryRegion { base: 0, length: 0 }; MAX_MEMORY_REGIONS];
    let mut region_count = 0;

    if info.flags & FLAG_MMAP != 0 {
        let mut cursor = info.mmap_addr;
        let end = info.mmap_addr + info.mmap_length;
        while cursor < end && region_count < MAX_MEMORY_REGIONS {
            // SAFETY: `cursor` walks the bootloader-supplied mmap buffer,
            // bounded by `mmap_length`.
            let entry = unsafe { &*(cursor as *const MmapEntry) };
            if entry.entry_type == MMAP_TYPE_AVAILABLE {
                regions[region_count] = MemoryRegion {
                    base: entry.base_addr,
                    length: entry.length,
                };
                region_count += 1;
            }
            cursor += entry.size + 4;
        }
    }

    BootInfo {
        mem_lower_kib: if info.flags & FLAG_MEM != 0 { info.mem_lower } else { 0 },
        mem_upper_kib: if info.flags & FLAG_MEM != 0 { info.mem_upper } else { 0 },
        regions,
        region_count,
    }
}
