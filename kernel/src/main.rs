//! Binary entry shim.
//!
//! Everything that actually runs lives in the `keel_kernel` library:
//! `_start` (in [`keel_kernel::arch::x86::boot`]), the panic handler,
//! and the global allocator are all defined there so the same code
//! path is exercised by both this binary and the `tests/` harness
//! binaries. This crate exists only because Cargo wants a `main.rs` to
//! produce the bootable `keel-kernel` ELF image.

#![no_std]
#![no_main]

extern crate keel_kernel;
