//! The "return to kernel" trampoline trick.
//!
//! Both the syscall gate and a dishonorable exit need to leave interrupt
//! context and resume execution in ordinary kernel code, on the kernel
//! stack, with interrupts re-enabled by the `iret` itself. Rather than
//! calling the dispatcher from inside the ISR (deep stack, interrupts
//! still masked), [`redirect_to_kernel`] rewrites the pending interrupt
//! frame in place so that when [`super::idt`]'s common stub executes its
//! `iretd`, control lands in kernel mode at the dispatcher instead of back
//! in user code.

use super::gdt::selectors;
use super::idt::RawInterruptFrame;

/// Rewrites `frame` so the ISR's closing `iretd` transfers control to
/// `dst` in kernel mode on the kernel stack, rather than back to user
/// code. `dst` must never return: there is no caller stack frame to
/// return into.
pub fn redirect_to_kernel(frame: &mut RawInterruptFrame, dst: extern "C" fn() -> !) {
    let kernel_stack_top = super::gdt::current_kernel_stack_top();

    frame.eip = dst as usize as u32;
    frame.cs = selectors::KERNEL_CODE as u32;
    frame.ds = selectors::KERNEL_DATA as u32;
    frame.user_ss = selectors::KERNEL_DATA as u32;
    frame.user_esp = kernel_stack_top;
    frame.ebp = kernel_stack_top;
}
