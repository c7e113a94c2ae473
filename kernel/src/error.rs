//! Kernel error codes.
//!
//! Every fallible kernel operation returns `Result<T, KernelError>`. At the
//! syscall boundary a `KernelError` collapses to its negative numeric code
//! via [`KernelError::code`], which is what userspace actually observes in
//! EAX.

use core::fmt;

/// Kernel error code, one per negative value a syscall may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Unclassified failure.
    Unknown,
    /// Operation recognized but not implemented.
    NoImpl,
    /// No such file, directory, or timer handle.
    NoEnt,
    /// Resource already in use (single-handle device, mount point, ...).
    Busy,
    /// A fixed-size table is full.
    TooMany,
    /// Mount point index out of range or unmounted.
    NoMountPoint,
    /// No filesystem driver registered under that name.
    NoFs,
    /// Path component is not the expected node type (file vs. directory).
    WrongType,
    /// Underlying device or media I/O failure.
    IoError,
    /// Allocation failed: frames, heap, or table slots exhausted.
    NoMem,
    /// On-disk or in-memory structure failed a consistency check.
    Inconsistent,
    /// Executable lacks a valid ELF header.
    NotElf,
    /// ELF header fields do not match the supported format.
    ElfFormat,
    /// Operation attempted by a process without the rights to perform it.
    NotPermitted,
    /// Malformed request (also used for `E_TERM`, which shares this code).
    InvalidRequest,
}

impl KernelError {
    /// The negative numeric code surfaced to userspace in EAX.
    pub const fn code(self) -> i32 {
        match self {
            Self::Unknown => -1,
            Self::NoImpl => -2,
            Self::NoEnt => -3,
            Self::Busy => -4,
            Self::TooMany => -5,
            Self::NoMountPoint => -6,
            Self::NoFs => -7,
            Self::WrongType => -8,
            Self::IoError => -9,
            Self::NoMem => -10,
            Self::Inconsistent => -11,
            Self::NotElf => -12,
            Self::ElfFormat => -13,
            Self::NotPermitted => -14,
            Self::InvalidRequest => -15,
        }
    }

    /// `E_TERM` is a distinct name for `E_INVREQ` used by a handful of call
    /// sites that reject malformed termination-adjacent requests.
    pub const TERM: Self = Self::InvalidRequest;
}

pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Unknown => "unknown error",
            Self::NoImpl => "not implemented",
            Self::NoEnt => "no such entry",
            Self::Busy => "resource busy",
            Self::TooMany => "table full",
            Self::NoMountPoint => "no such mount point",
            Self::NoFs => "no such filesystem type",
            Self::WrongType => "wrong node type",
            Self::IoError => "I/O error",
            Self::NoMem => "out of memory",
            Self::Inconsistent => "inconsistent structure",
            Self::NotElf => "not an ELF file",
            Self::ElfFormat => "unsupported ELF format",
            Self::NotPermitted => "operation not permitted",
            Self::InvalidRequest => "invalid request",
        };
        write!(f, "{} ({})", msg, self.code())
    }
}

/// Sentinel status surfaced to a parent's `exec` when a child is torn down
/// by a fault or a failed user-pointer validation instead of calling `exit`.
pub const DISHONORABLE_EXIT_STATUS: i32 = -100;
