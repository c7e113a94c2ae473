//! Keel Kernel
//!
//! A 32-bit x86, Multiboot-compliant, non-preemptive kernel: one process
//! runs at a time, interrupts and syscalls are serviced synchronously,
//! and there is no scheduler. This library holds the entire kernel; the
//! `keel-kernel` binary target ([`main.rs`]) exists only so Cargo has
//! somewhere to link `_start` into a bootable ELF image.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(target_os = "none", test_runner(crate::test_framework::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(all(target_arch = "x86", target_os = "none"))]
use mm::heap::KernelHeap;

#[cfg(all(target_arch = "x86", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: KernelHeap = KernelHeap;

// Host target (`cargo test` on the dev machine, not under QEMU): delegate
// to the system allocator so unit tests can use `Vec`/`String` normally.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod bootstrap;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod fs;
pub mod irq;
mod intrinsics;
pub mod mm;
pub mod process;
pub mod serial;
mod syscall;
#[cfg(any(test, target_os = "none"))]
pub mod test_framework;
pub mod timer;

#[cfg(any(test, target_os = "none"))]
pub use test_framework::{exit_qemu, test_panic_handler, QemuExitCode, Testable};

#[cfg(all(not(any(test, feature = "test-kernel")), target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("[KERNEL PANIC] {info}");
    arch::halt();
}

#[cfg(all(any(test, feature = "test-kernel"), target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation failure is unrecoverable this early in a `no_std`
/// kernel; the `alloc_error_handler` ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {layout:?}");
}
