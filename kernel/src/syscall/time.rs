//! Clock syscalls: 0x0101, 0x0110.

use crate::process;
use crate::timer;

/// `get_local_time`: no arguments, returns wall-clock seconds.
pub fn get_local_time() {
    let pcb = process::current();
    pcb.cpu_context.eax = timer::get_local_s() as u32;
}

/// `delay_ms`: EBX=milliseconds. Busy-waits on the calling process's
/// behalf before returning; there is no scheduler to hand the CPU to in
/// the meantime.
pub fn delay_ms() {
    let pcb = process::current();
    let ms = pcb.cpu_context.ebx;
    timer::delay_ms(ms);
    process::current().cpu_context.eax = 0;
}
