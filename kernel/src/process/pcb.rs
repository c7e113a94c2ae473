//! Process Control Block.
//!
//! Each PCB owns its parent: the chain of `parent` links is the whole
//! process table. There is no separate table to look PIDs up in — the
//! only process anyone can ever reach is [`super::current`].

use alloc::boxed::Box;

use crate::arch::x86::context::CpuContext;
use crate::fs::path::CanonicalPath;
use crate::fs::File;

/// Maximum simultaneously open files per process.
pub const MAX_FILES: usize = 16;

/// One process file-table slot.
pub struct ProcFile {
    pub file: Option<File>,
}

/// A process control block.
pub struct Pcb {
    pub pid: u32,
    /// Physical address of this process's page directory.
    pub pagedir: usize,
    /// Register snapshot taken on syscall/exception entry, restored on
    /// the way back to user mode.
    pub cpu_context: CpuContext,
    pub cwd: CanonicalPath,
    pub files: [ProcFile; MAX_FILES],
    /// Owns the parent PCB; `None` only for the init process.
    pub parent: Option<Box<Pcb>>,
}

impl Pcb {
    pub(super) fn new(pid: u32, pagedir: usize, cwd: CanonicalPath, parent: Option<Box<Pcb>>) -> Box<Pcb> {
        Box::new(Pcb {
            pid,
            pagedir,
            cpu_context: CpuContext::default(),
            cwd,
            files: core::array::from_fn(|_| ProcFile { file: None }),
            parent,
        })
    }

    /// Index of a free file slot, if any.
    pub fn alloc_file_slot(&mut self) -> Option<usize> {
        self.files.iter().position(|f| f.file.is_none())
    }
}
