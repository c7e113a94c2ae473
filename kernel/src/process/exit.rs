//! `pop`: tear down the current process and return control to its
//! parent.

use super::CURRENT;
use crate::error::{KernelError, KernelResult};
use crate::mm::vmm;

/// Pops the current process. The init process (no parent) refuses.
pub fn pop() -> KernelResult<()> {
    let mut guard = CURRENT.lock();
    let mut pcb = guard.take().expect("process management not initialized");

    if pcb.parent.is_none() {
        *guard = Some(pcb);
        return Err(KernelError::NotPermitted);
    }
    let parent = pcb.parent.take().unwrap();

    vmm::destroy_uvas();
    vmm::switch_vas(parent.pagedir);
    vmm::delete_vas(pcb.pagedir);
    drop(pcb);

    *guard = Some(parent);
    Ok(())
}
