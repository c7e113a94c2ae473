//! Bare-metal test harness.
//!
//! `cargo test`'s per-target binaries boot like the kernel itself (same
//! `_start`, same `kernel_main`... except tests skip straight to their
//! own list of cases instead of mounting a disk and execing init) and
//! report their outcome through QEMU's `isa-debug-exit` device: a write
//! to port 0xf4 halts the VM with that value folded into its process
//! exit code, which the test runner script reads back.

use core::panic::PanicInfo;

use crate::arch::x86::outl;

const ISA_DEBUG_EXIT_PORT: u16 = 0xf4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub fn exit_qemu(code: QemuExitCode) -> ! {
    // SAFETY: 0xf4 is only meaningful under the `isa-debug-exit` device the
    // test runner's QEMU invocation adds; on real hardware this is simply
    // never called.
    unsafe {
        outl(ISA_DEBUG_EXIT_PORT, code as u32);
    }
    loop {
        core::hint::spin_loop();
    }
}

/// A zero-argument test function, run and reported on by [`test_runner`].
pub trait Testable {
    fn run(&self);
}

impl<T: Fn()> Testable for T {
    fn run(&self) {
        crate::serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        crate::serial_println!("[ok]");
    }
}

pub fn test_runner(tests: &[&dyn Testable]) {
    crate::serial_println!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    crate::serial_println!("[failed]\n");
    crate::serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failed);
}
