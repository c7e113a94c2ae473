//! Architecture-specific glue. Only 32-bit x86 is supported.

pub mod x86;

pub use x86::*;
