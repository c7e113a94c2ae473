//! Console syscalls: 0x0200-0x0202.

use crate::drivers::console;
use crate::mm::vmm;
use crate::process;

/// `console_write`: EBX=ptr, ECX=len. A bad range is a dishonorable exit,
/// not an error return: there is no way to report it to a process whose
/// pointer we can't trust.
pub fn write() {
    let pcb = process::current();
    let ptr = pcb.cpu_context.ebx as usize;
    let len = pcb.cpu_context.ecx as usize;

    if !vmm::validate_user_ptr_mapped(ptr, len) {
        super::do_dishonorable_exit();
        return;
    }

    // SAFETY: just validated mapped and entirely in the user half.
    let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, len) };
    console::write(bytes);
    process::current().cpu_context.eax = 0;
}

/// `console_readline`: EBX=buf, ECX=cap. Returns the byte count read.
pub fn readline() {
    let pcb = process::current();
    let ptr = pcb.cpu_context.ebx as usize;
    let cap = pcb.cpu_context.ecx as usize;

    if !vmm::validate_user_ptr_mapped(ptr, cap) {
        super::do_dishonorable_exit();
        return;
    }

    // SAFETY: just validated mapped and entirely in the user half.
    let buf = unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, cap) };
    let n = console::readline(buf);
    process::current().cpu_context.eax = n as u32;
}

/// `console_getchar`: no arguments, returns one decoded input byte.
pub fn getchar() {
    let b = console::getchar();
    process::current().cpu_context.eax = b as u32;
}
