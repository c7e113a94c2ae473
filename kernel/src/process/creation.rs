//! `push`: create a child of the current process in a fresh address
//! space and make it current.

use super::{alloc_proc_stack, pcb::Pcb, CURRENT};
use crate::error::{KernelError, KernelResult};
use crate::mm::vmm;

/// Pushes a new process onto the stack. The child starts with an empty
/// file table and inherits the parent's working directory; its caller
/// is responsible for giving it a program to run via [`super::setup_cpu_ctx`].
pub fn push() -> KernelResult<u32> {
    let mut guard = CURRENT.lock();
    let parent = guard.take().expect("process management not initialized");

    let Some(new_pagedir) = vmm::new_vas() else {
        *guard = Some(parent);
        return Err(KernelError::NoMem);
    };
    vmm::switch_vas(new_pagedir);

    if let Err(e) = alloc_proc_stack() {
        vmm::switch_vas(parent.pagedir);
        vmm::delete_vas(new_pagedir);
        *guard = Some(parent);
        return Err(e);
    }

    let pid = parent.pid + 1;
    let cwd = parent.cwd.clone();
    let child = Pcb::new(pid, new_pagedir, cwd, Some(parent));
    *guard = Some(child);
    Ok(pid)
}
