//! ELF32 loader: maps `PT_LOAD` segments of a SysV/x86 executable into the
//! current address space and reports its entry point.
//!
//! Header and program-header-entry fields are pulled out by hand from raw
//! byte offsets rather than through a `repr(C)` cast: the on-disk layout
//! has no alignment padding to speak of, and manual extraction removes
//! any doubt about it.

use alloc::vec;

use crate::error::{KernelError, KernelResult};
use crate::fs::{self, File};
use crate::mm::vmm;
use crate::mm::{frame_allocator, PAGE_SIZE};

const ELF_HEADER_SIZE: usize = 52;
const ELF_PH_ENTRY_SIZE: usize = 32;

const ELF_MAGIC: u32 = 0x464C_457F;
const ELF_CLASS_32BIT: u8 = 1;
const ELF_ENC_LE: u8 = 1;
const ELF_ABI_SYSV: u8 = 0;
const ELF_TYPE_EXEC: u16 = 2;
const ELF_INSTSET_X86: u16 = 0x03;

const PH_TYPE_NULL: u32 = 0;
const PH_TYPE_LOAD: u32 = 1;

struct ElfHeader {
    entry: u32,
    ph_offset: u32,
    ph_ent_size: u16,
    ph_ent_num: u16,
}

fn parse_header(buf: &[u8; ELF_HEADER_SIZE]) -> KernelResult<ElfHeader> {
    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != ELF_MAGIC {
        return Err(KernelError::NotElf);
    }

    let class = buf[4];
    let data_enc = buf[5];
    let h_vers = buf[6];
    let abi = buf[7];
    let elf_type = u16::from_le_bytes([buf[16], buf[17]]);
    let inst_set = u16::from_le_bytes([buf[18], buf[19]]);
    let vers = u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]);
    if class != ELF_CLASS_32BIT
        || data_enc != ELF_ENC_LE
        || h_vers != 1
        || abi != ELF_ABI_SYSV
        || elf_type != ELF_TYPE_EXEC
        || inst_set != ELF_INSTSET_X86
        || vers != 1
    {
        return Err(KernelError::ElfFormat);
    }

    let header = ElfHeader {
        entry: u32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]),
        ph_offset: u32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]),
        ph_ent_size: u16::from_le_bytes([buf[42], buf[43]]),
        ph_ent_num: u16::from_le_bytes([buf[44], buf[45]]),
    };
    if header.ph_ent_size as usize != ELF_PH_ENTRY_SIZE {
        return Err(KernelError::ElfFormat);
    }
    Ok(header)
}

struct ProgramHeader {
    p_type: u32,
    offset: u32,
    vaddr: u32,
    filesz: u32,
    memsz: u32,
}

fn parse_ph(buf: &[u8; ELF_PH_ENTRY_SIZE]) -> ProgramHeader {
    ProgramHeader {
        p_type: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
        offset: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        vaddr: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        filesz: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
        memsz: u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
    }
}

/// Reads exactly `buf.len()` bytes at `offset`, mapping a short read to
/// `short_err` rather than silently returning a partial buffer.
fn read_exact(file: &File, buf: &mut [u8], offset: u32, short_err: KernelError) -> KernelResult<()> {
    let n = fs::vfs_read(file, buf, offset)?;
    if n != buf.len() {
        return Err(short_err);
    }
    Ok(())
}

fn page_align_down(addr: u32) -> u32 {
    addr & !(PAGE_SIZE as u32 - 1)
}

fn page_align_up(addr: u32) -> u32 {
    page_align_down(addr.wrapping_add(PAGE_SIZE as u32 - 1))
}

/// Maps every page in `[start, end)` that is not already present,
/// backing it with a freshly allocated zeroed frame.
fn ensure_mapped(start: u32, end: u32) -> KernelResult<()> {
    let mut vaddr = start;
    while vaddr < end {
        if vmm::get_phys(vaddr as usize).is_none() {
            let phys = frame_allocator::alloc().ok_or(KernelError::NoMem)?;
            if !vmm::map(phys, vaddr as usize, 1) {
                frame_allocator::free(phys);
                return Err(KernelError::NoMem);
            }
        }
        vaddr += PAGE_SIZE as u32;
    }
    Ok(())
}

fn load_segment(file: &File, ph: &ProgramHeader) -> KernelResult<()> {
    if ph.filesz > ph.memsz {
        return Err(KernelError::ElfFormat);
    }

    let span_start = page_align_down(ph.vaddr);
    let span_end = page_align_up(ph.vaddr.checked_add(ph.memsz).ok_or(KernelError::ElfFormat)?);
    if !vmm::validate_user_ptr(span_start as usize, (span_end - span_start) as usize) {
        return Err(KernelError::ElfFormat);
    }

    ensure_mapped(span_start, span_end)?;

    // SAFETY: `ensure_mapped` just mapped every page in [span_start, span_end);
    // the whole memsz range falls within it.
    unsafe {
        core::ptr::write_bytes(ph.vaddr as *mut u8, 0, ph.memsz as usize);
    }

    if ph.filesz > 0 {
        let mut data = vec![0u8; ph.filesz as usize];
        read_exact(file, &mut data, ph.offset, KernelError::ElfFormat)?;
        // SAFETY: `ph.vaddr` through `ph.vaddr + ph.filesz` lies within the
        // zeroed, mapped range established above.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), ph.vaddr as *mut u8, ph.filesz as usize);
        }
    }

    Ok(())
}

/// Loads every `PT_LOAD` segment of `file` into the current address
/// space and returns the program's entry point.
pub fn load(file: &File) -> KernelResult<u32> {
    let mut header_buf = [0u8; ELF_HEADER_SIZE];
    read_exact(file, &mut header_buf, 0, KernelError::NotElf)?;
    let header = parse_header(&header_buf)?;

    for i in 0..header.ph_ent_num as u32 {
        let mut ph_buf = [0u8; ELF_PH_ENTRY_SIZE];
        read_exact(file, &mut ph_buf, header.ph_offset + i * ELF_PH_ENTRY_SIZE as u32, KernelError::ElfFormat)?;
        let ph = parse_ph(&ph_buf);

        if ph.p_type == PH_TYPE_NULL {
            continue;
        }
        if ph.p_type != PH_TYPE_LOAD {
            return Err(KernelError::ElfFormat);
        }
        load_segment(file, &ph)?;
    }

    Ok(header.entry)
}
