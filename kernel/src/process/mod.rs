//! Process model.
//!
//! There is no scheduler and no process table: processes form a single
//! stack, the init process at the root. `push` creates a child in a
//! fresh address space and makes it current; `pop` tears the current
//! process down and hands control back to its parent. Exactly one PCB
//! is current at any instant, reachable only through [`current`].

use alloc::boxed::Box;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::{frame_allocator, vmm, PAGE_SIZE};

pub mod creation;
pub mod cwd;
pub mod exit;
pub mod pcb;

pub use creation::push;
pub use exit::pop;
pub use pcb::{Pcb, ProcFile, MAX_FILES};

/// User stack pages reserved right below the kernel half, for every
/// process.
const PROC_STACK_PAGES: usize = 4;
const INIT_CWD: &str = "0:";

static CURRENT: Mutex<Option<Box<Pcb>>> = Mutex::new(None);

/// Builds the init PCB (PID 0, no parent) in the address space the boot
/// code already set up, reserving its user stack.
pub fn init() -> KernelResult<()> {
    let cwd = crate::fs::path::canonicalize(INIT_CWD)?;
    let pagedir = vmm::cur_vas();
    alloc_proc_stack()?;
    *CURRENT.lock() = Some(Pcb::new(0, pagedir, cwd, None));
    Ok(())
}

/// The currently running process.
///
/// # Panics
/// Panics if called before [`init`].
pub fn current() -> &'static mut Pcb {
    let mut guard = CURRENT.lock();
    let pcb = guard.as_mut().expect("process management not initialized");
    let ptr: *mut Pcb = &mut **pcb;
    // SAFETY: process state changes only ever happen synchronously inside
    // syscall dispatch or boot, never reentrantly or from an interrupt
    // handler, so nothing can observe the lock released early.
    unsafe { &mut *ptr }
}

/// Builds the CPU context for a just-`exec`'d program: zeroed general
/// registers, user segments, `IF` set, stack at the top of the user
/// half, instruction pointer at `entry`.
pub fn setup_cpu_ctx(pcb: &mut Pcb, entry: u32) {
    pcb.cpu_context = crate::arch::x86::context::CpuContext::new_user(entry, vmm::KERNEL_VAS_START as u32);
}

/// Maps [`PROC_STACK_PAGES`] fresh, zeroed pages immediately below the
/// kernel half in the *currently active* address space.
fn alloc_proc_stack() -> KernelResult<()> {
    let base = vmm::KERNEL_VAS_START - PROC_STACK_PAGES * PAGE_SIZE;
    for i in 0..PROC_STACK_PAGES {
        let vaddr = base + i * PAGE_SIZE;
        let phys = frame_allocator::alloc().ok_or(KernelError::NoMem)?;
        if !vmm::map(phys, vaddr, 1) {
            frame_allocator::free(phys);
            return Err(KernelError::NoMem);
        }
        // SAFETY: `map` just backed this exact page.
        unsafe {
            core::ptr::write_bytes(vaddr as *mut u8, 0, PAGE_SIZE);
        }
    }
    Ok(())
}
