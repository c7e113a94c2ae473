//! Process-control syscalls: `exit`, `exec`, `chdir`, `getcwd`.
//!
//! `exit` and `exec` both change which PCB is current partway through,
//! so neither can hold onto a `&mut Pcb` across that point: each
//! re-fetches [`process::current`] fresh once the new process is
//! installed.

use alloc::string::String;

use crate::elf;
use crate::error::KernelError;
use crate::fs;
use crate::fs::path::PATH_MAX;
use crate::mm::vmm;
use crate::process;

/// Copies a validated user string of at most `PATH_MAX` bytes into a
/// kernel buffer. Does not itself validate the pointer range.
fn copy_user_str(ptr: usize, len: usize) -> Result<String, KernelError> {
    if len > PATH_MAX {
        return Err(KernelError::InvalidRequest);
    }
    // SAFETY: caller has already run `validate_user_ptr_mapped(ptr, len)`.
    let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, len) };
    String::from_utf8(bytes.to_vec()).map_err(|_| KernelError::InvalidRequest)
}

/// `exit`: EBX=status. Pops the current process and reports `status` to
/// its parent as if the parent's `exec` had just returned. The init
/// process has no parent and refuses.
pub fn exit() {
    let pcb = process::current();
    let retval = pcb.cpu_context.ebx;

    match process::pop() {
        Ok(()) => {
            let parent = process::current();
            parent.cpu_context.eax = 0;
            parent.cpu_context.ebx = retval;
        }
        Err(e) => {
            process::current().cpu_context.eax = e.code() as u32;
        }
    }
}

/// `exec`: EBX=path ptr, ECX=path len. Pushes a new process, loads the
/// named executable into it, and on success leaves the new process
/// current with a fresh entry-point context. On any failure the new
/// process (if one was pushed) is torn back down and the error is
/// reported to the caller, which stays current throughout.
pub fn exec() {
    let pcb = process::current();
    let ptr = pcb.cpu_context.ebx as usize;
    let len = pcb.cpu_context.ecx as usize;

    if !vmm::validate_user_ptr_mapped(ptr, len) {
        super::do_dishonorable_exit();
        return;
    }

    let result = (|| -> Result<(), KernelError> {
        let raw_path = copy_user_str(ptr, len)?;
        let canonical = process::cwd::resolve(process::current(), &raw_path)?;
        let file = fs::vfs_open(&canonical.render())?;

        match process::push() {
            Ok(_) => {}
            Err(e) => {
                fs::vfs_close(file);
                return Err(e);
            }
        }

        let loaded = elf::load(&file);
        fs::vfs_close(file);
        match loaded {
            Ok(entry) => {
                let child = process::current();
                process::setup_cpu_ctx(child, entry);
                Ok(())
            }
            Err(e) => {
                // `load` may have failed partway through mapping the new
                // process's own address space; tear it back down and
                // report the error to its parent, which becomes current
                // again.
                process::pop().expect("freshly pushed process has a parent");
                Err(e)
            }
        }
    })();

    if let Err(e) = result {
        process::current().cpu_context.eax = e.code() as u32;
    }
}

/// `chdir`: EBX=path ptr, ECX=path len.
pub fn chdir() {
    let pcb = process::current();
    let ptr = pcb.cpu_context.ebx as usize;
    let len = pcb.cpu_context.ecx as usize;

    if !vmm::validate_user_ptr_mapped(ptr, len) {
        super::do_dishonorable_exit();
        return;
    }

    let result = copy_user_str(ptr, len).and_then(|path| process::cwd::chdir(process::current(), &path));

    let pcb = process::current();
    pcb.cpu_context.eax = match result {
        Ok(()) => 0,
        Err(e) => e.code() as u32,
    };
}

/// `getcwd`: EBX=buf, sized for up to [`PATH_MAX`] bytes plus a NUL
/// terminator.
pub fn getcwd() {
    let pcb = process::current();
    let ptr = pcb.cpu_context.ebx as usize;

    if !vmm::validate_user_ptr_mapped(ptr, PATH_MAX + 1) {
        super::do_dishonorable_exit();
        return;
    }

    let rendered = process::cwd::getcwd(process::current());
    // SAFETY: just validated mapped and entirely in the user half, and
    // `rendered` is always within `PATH_MAX` bytes (its segments were
    // bounds-checked when the path was canonicalized).
    let buf = unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, PATH_MAX + 1) };
    buf[..rendered.len()].copy_from_slice(rendered.as_bytes());
    buf[rendered.len()] = 0;

    process::current().cpu_context.eax = rendered.len() as u32;
}
