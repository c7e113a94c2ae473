//! System call dispatch.
//!
//! The syscall gate and a dishonorable exit both need to leave interrupt
//! context and resume on the kernel stack with interrupts re-enabled by
//! `iret` itself, so both go through [`arch::x86::syscall::redirect_to_kernel`]
//! rather than dispatching directly from the ISR. [`handle_syscall`] first
//! snapshots the user register state into the current PCB, exactly the
//! same snapshot a fault takes before a dishonorable exit, so a syscall
//! handler and a fault handler see the same shape of "the process that
//! was just interrupted".
//!
//! Every handler below owns writing its own return value into
//! `EAX`/`EBX`: a shared post-dispatch write would race a handler that
//! pops the current process (`exit`, a dishonorable exit) and replaces
//! it with its parent.

use crate::arch::x86::context::go_userspace;
use crate::arch::x86::idt::RawInterruptFrame;
use crate::arch::x86::syscall::redirect_to_kernel;
use crate::error::DISHONORABLE_EXIT_STATUS;
use crate::process;

mod console;
mod filesystem;
mod process_calls;
mod time;

const SYS_GET_LOCAL_TIME: u32 = 0x0101;
const SYS_DELAY_MS: u32 = 0x0110;
const SYS_CONSOLE_WRITE: u32 = 0x0200;
const SYS_CONSOLE_READLINE: u32 = 0x0201;
const SYS_CONSOLE_GETCHAR: u32 = 0x0202;
const SYS_EXIT: u32 = 0x1000;
const SYS_EXEC: u32 = 0x1001;
const SYS_CHDIR: u32 = 0x1002;
const SYS_GETCWD: u32 = 0x1003;
const SYS_MOUNT: u32 = 0x1100;
const SYS_UNMOUNT: u32 = 0x1101;
const SYS_OPEN: u32 = 0x1110;
const SYS_CLOSE: u32 = 0x1111;
const SYS_READ: u32 = 0x1112;
const SYS_READDIR: u32 = 0x1114;

/// Called from [`crate::arch::x86::idt::common_interrupt_handler`] for
/// vector 48.
pub fn handle_syscall(frame: &mut RawInterruptFrame) {
    process::current().cpu_context = frame.to_cpu_context();
    redirect_to_kernel(frame, dispatch_trampoline);
}

/// Called from [`crate::irq::handle_exception`] when a fault's EIP lies
/// in the user half. Registers don't matter here: the process is being
/// torn down, not resumed.
pub fn redirect_to_dishonorable_exit(frame: &mut RawInterruptFrame) {
    redirect_to_kernel(frame, dishonorable_exit_trampoline);
}

extern "C" fn dispatch_trampoline() -> ! {
    let syscall_n = process::current().cpu_context.eax;
    dispatch(syscall_n);

    let pcb = process::current();
    // SAFETY: every handler below, on every path, leaves the now-current
    // PCB with a valid `cpu_context` to resume into.
    unsafe { go_userspace(&pcb.cpu_context) }
}

extern "C" fn dishonorable_exit_trampoline() -> ! {
    do_dishonorable_exit();
    let pcb = process::current();
    // SAFETY: same as `dispatch_trampoline`.
    unsafe { go_userspace(&pcb.cpu_context) }
}

/// Pops the current process and reports [`DISHONORABLE_EXIT_STATUS`] to
/// the parent as if its `exec` had just returned. Called both for a
/// fault in user code and for an out-of-range syscall number or a
/// pointer that fails validation partway through a handler.
pub(super) fn do_dishonorable_exit() {
    match process::pop() {
        Ok(()) => {
            let pcb = process::current();
            pcb.cpu_context.eax = 0;
            pcb.cpu_context.ebx = DISHONORABLE_EXIT_STATUS as u32;
        }
        Err(e) => panic!("dishonorable exit of init process: {e}"),
    }
}

fn dispatch(syscall_n: u32) {
    match syscall_n {
        SYS_GET_LOCAL_TIME => time::get_local_time(),
        SYS_DELAY_MS => time::delay_ms(),
        SYS_CONSOLE_WRITE => console::write(),
        SYS_CONSOLE_READLINE => console::readline(),
        SYS_CONSOLE_GETCHAR => console::getchar(),
        SYS_EXIT => process_calls::exit(),
        SYS_EXEC => process_calls::exec(),
        SYS_CHDIR => process_calls::chdir(),
        SYS_GETCWD => process_calls::getcwd(),
        SYS_MOUNT => filesystem::mount(),
        SYS_UNMOUNT => filesystem::unmount(),
        SYS_OPEN => filesystem::open(),
        SYS_CLOSE => filesystem::close(),
        SYS_READ => filesystem::read(),
        SYS_READDIR => filesystem::readdir(),
        _ => do_dishonorable_exit(),
    }
}
