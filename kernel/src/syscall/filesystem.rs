//! Filesystem syscalls: `mount`, `unmount`, `open`, `close`, `read`,
//! `readdir`.
//!
//! `mount`, `read`, and `readdir` take a single pointer-to-struct
//! argument in EBX rather than spreading fields across EBX/ECX/EDX,
//! matching the userland syscall stubs that build these structs on the
//! caller's stack.

use alloc::format;
use alloc::string::String;
use alloc::vec;

use crate::error::KernelError;
use crate::fs::{self, path::FILENAME_MAX, DirEntry};
use crate::mm::vmm;
use crate::process;
use crate::process::pcb::{Pcb, ProcFile};

#[repr(C)]
#[derive(Clone, Copy)]
struct MountParams {
    mp: u32,
    blkdev: u32,
    fs_type: u32,
    blkdev_n: u32,
    fs_type_n: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ReadParams {
    fd: u32,
    buf: u32,
    offset: u32,
    n: u32,
}

/// Wire form of one `readdir` entry: a fixed-size name plus a node-kind
/// tag, matching what the userland C library unpacks.
#[repr(C)]
struct DirentWire {
    name: [u8; FILENAME_MAX + 1],
    kind: u32,
}

const KIND_FILE: u32 = 0;
const KIND_DIR: u32 = 1;

/// Reads a `#[repr(C)]` struct of type `T` out of validated user memory.
///
/// # Safety
/// `ptr` must already have passed `validate_user_ptr_mapped` for
/// `size_of::<T>()` bytes.
unsafe fn read_struct<T: Copy>(ptr: usize) -> T {
    core::ptr::read_unaligned(ptr as *const T)
}

fn copy_user_str(ptr: usize, len: usize) -> Result<String, KernelError> {
    if !vmm::validate_user_ptr_mapped(ptr, len) {
        return Err(KernelError::InvalidRequest);
    }
    // SAFETY: just validated.
    let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, len) };
    String::from_utf8(bytes.to_vec()).map_err(|_| KernelError::InvalidRequest)
}

fn finish(result: Result<i32, KernelError>) {
    let pcb = process::current();
    pcb.cpu_context.eax = match result {
        Ok(v) => v as u32,
        Err(e) => e.code() as u32,
    };
}

/// `mount`: EBX=ptr to [`MountParams`].
pub fn mount() {
    let pcb = process::current();
    let ptr = pcb.cpu_context.ebx as usize;

    if !vmm::validate_user_ptr_mapped(ptr, core::mem::size_of::<MountParams>()) {
        super::do_dishonorable_exit();
        return;
    }
    // SAFETY: just validated.
    let params = unsafe { read_struct::<MountParams>(ptr) };

    let result = (|| -> Result<i32, KernelError> {
        let blkdev = copy_user_str(params.blkdev as usize, params.blkdev_n as usize)?;
        let fs_type = copy_user_str(params.fs_type as usize, params.fs_type_n as usize)?;
        let mp = format!("{}", params.mp);
        fs::mount(&blkdev, &mp, &fs_type)?;
        Ok(0)
    })();
    finish(result);
}

/// `unmount`: EBX=mount point index.
pub fn unmount() {
    let pcb = process::current();
    let mp = pcb.cpu_context.ebx;
    finish(fs::unmount(mp).map(|()| 0));
}

/// `open`: EBX=path ptr, ECX=path len, EDX=`1` for a directory, `0` for
/// a file.
pub fn open() {
    let pcb = process::current();
    let ptr = pcb.cpu_context.ebx as usize;
    let len = pcb.cpu_context.ecx as usize;
    let want_dir = pcb.cpu_context.edx != 0;

    if !vmm::validate_user_ptr_mapped(ptr, len) {
        super::do_dishonorable_exit();
        return;
    }

    let result = (|| -> Result<i32, KernelError> {
        let raw_path = copy_user_str(ptr, len)?;
        let pcb = process::current();
        let canonical = process::cwd::resolve(pcb, &raw_path)?;
        let rendered = canonical.render();

        let file = if want_dir { fs::vfs_opendir(&rendered)? } else { fs::vfs_open(&rendered)? };
        let fd = pcb.alloc_file_slot().ok_or(KernelError::TooMany)?;
        pcb.files[fd] = ProcFile { file: Some(file) };
        Ok(fd as i32)
    })();
    finish(result);
}

/// `close`: EBX=fd.
pub fn close() {
    let pcb = process::current();
    let fd = pcb.cpu_context.ebx as usize;

    let result = take_file(pcb, fd).map(|file| {
        fs::vfs_close(file);
        0
    });
    finish(result);
}

/// Removes and returns the file at `fd`, if any is open there.
fn take_file(pcb: &mut Pcb, fd: usize) -> Result<fs::File, KernelError> {
    pcb.files.get_mut(fd).ok_or(KernelError::InvalidRequest)?.file.take().ok_or(KernelError::NoEnt)
}

/// `read`: EBX=ptr to [`ReadParams`].
pub fn read() {
    let pcb = process::current();
    let ptr = pcb.cpu_context.ebx as usize;

    if !vmm::validate_user_ptr_mapped(ptr, core::mem::size_of::<ReadParams>()) {
        super::do_dishonorable_exit();
        return;
    }
    // SAFETY: just validated.
    let params = unsafe { read_struct::<ReadParams>(ptr) };

    if !vmm::validate_user_ptr_mapped(params.buf as usize, params.n as usize) {
        super::do_dishonorable_exit();
        return;
    }

    let result = (|| -> Result<i32, KernelError> {
        let pcb = process::current();
        let file = pcb
            .files
            .get(params.fd as usize)
            .ok_or(KernelError::InvalidRequest)?
            .file
            .as_ref()
            .ok_or(KernelError::NoEnt)?;
        // SAFETY: just validated mapped and in the user half.
        let buf = unsafe { core::slice::from_raw_parts_mut(params.buf as *mut u8, params.n as usize) };
        let n = fs::vfs_read(file, buf, params.offset)?;
        Ok(n as i32)
    })();
    finish(result);
}

/// `readdir`: EBX=ptr to a [`ReadParams`]-shaped struct, `n` counting
/// [`DirentWire`] entries rather than bytes.
pub fn readdir() {
    let pcb = process::current();
    let ptr = pcb.cpu_context.ebx as usize;

    if !vmm::validate_user_ptr_mapped(ptr, core::mem::size_of::<ReadParams>()) {
        super::do_dishonorable_exit();
        return;
    }
    // SAFETY: just validated.
    let params = unsafe { read_struct::<ReadParams>(ptr) };

    let entry_bytes = core::mem::size_of::<DirentWire>() * params.n as usize;
    if !vmm::validate_user_ptr_mapped(params.buf as usize, entry_bytes) {
        super::do_dishonorable_exit();
        return;
    }

    let result = (|| -> Result<i32, KernelError> {
        let pcb = process::current();
        let file = pcb
            .files
            .get(params.fd as usize)
            .ok_or(KernelError::InvalidRequest)?
            .file
            .as_ref()
            .ok_or(KernelError::NoEnt)?;

        let mut entries = vec![
            DirEntry { name: String::new(), size: 0, is_dir: false };
            params.n as usize
        ];
        let n = fs::vfs_readdir(file, &mut entries, params.offset)?;

        // SAFETY: just validated `entry_bytes` mapped starting at
        // `params.buf`.
        let out = unsafe { core::slice::from_raw_parts_mut(params.buf as *mut DirentWire, params.n as usize) };
        for (i, entry) in entries.iter().take(n).enumerate() {
            let mut wire = DirentWire { name: [0; FILENAME_MAX + 1], kind: if entry.is_dir { KIND_DIR } else { KIND_FILE } };
            let bytes = entry.name.as_bytes();
            wire.name[..bytes.len()].copy_from_slice(bytes);
            out[i] = wire;
        }
        Ok(n as i32)
    })();
    finish(result);
}

