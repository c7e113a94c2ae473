//! Block device registration and single-writer handle allocation.
//!
//! Grounded on the original block device layer: drivers register
//! themselves into a fixed device list; a small pool of handles, each
//! owning its own 512-byte I/O buffer, guarantees no two callers can
//! interleave reads to the same device.

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

pub const BLOCK_SIZE: usize = 512;
const MAX_DEVICES: usize = 8;
const MAX_HANDLES: usize = 4;

pub type ReadBlockFn = fn(drvstate: usize, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> bool;
pub type MediaChangedFn = fn(drvstate: usize) -> bool;

fn never_changed(_drvstate: usize) -> bool {
    false
}

#[derive(Clone, Copy)]
struct Device {
    major: &'static str,
    nblocks: u32,
    drvstate: usize,
    read_blk: ReadBlockFn,
    media_changed: MediaChangedFn,
    in_use: bool,
}

#[derive(Clone, Copy)]
struct HandleSlot {
    device_idx: usize,
    buf: [u8; BLOCK_SIZE],
}

struct Registry {
    devices: [Option<Device>; MAX_DEVICES],
    handles: [Option<HandleSlot>; MAX_HANDLES],
}

impl Registry {
    const fn new() -> Self {
        Self {
            devices: [None; MAX_DEVICES],
            handles: [None; MAX_HANDLES],
        }
    }

    fn find_by_major(&self, major: &str) -> Option<usize> {
        self.devices
            .iter()
            .position(|d| matches!(d, Some(dev) if dev.major == major))
    }
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());

/// Opaque handle returned by [`get_handle`]. Single-use: releasing it and
/// re-acquiring a fresh one for the same device is the only way to reuse
/// its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle(usize);

/// Registers a new block device. Fails if `major` is already registered
/// or the device table is full.
pub fn register(
    major: &'static str,
    nblocks: u32,
    drvstate: usize,
    read_blk: ReadBlockFn,
    media_changed: Option<MediaChangedFn>,
) -> KernelResult<()> {
    let mut reg = REGISTRY.lock();
    if reg.find_by_major(major).is_some() {
        return Err(KernelError::Busy);
    }
    let slot = reg
        .devices
        .iter()
        .position(|d| d.is_none())
        .ok_or(KernelError::TooMany)?;
    reg.devices[slot] = Some(Device {
        major,
        nblocks,
        drvstate,
        read_blk,
        media_changed: media_changed.unwrap_or(never_changed),
        in_use: false,
    });
    println!("[BLKDEV] registered {major} ({nblocks} blocks)");
    Ok(())
}

/// Allocates the single outstanding handle for `major`'s device, along
/// with its 512-byte I/O buffer.
pub fn get_handle(major: &str) -> KernelResult<BlockHandle> {
    let mut reg = REGISTRY.lock();
    let dev_idx = reg.find_by_major(major).ok_or(KernelError::NoEnt)?;
    if reg.devices[dev_idx].unwrap().in_use {
        return Err(KernelError::Busy);
    }
    let handle_idx = reg
        .handles
        .iter()
        .position(|h| h.is_none())
        .ok_or(KernelError::TooMany)?;

    reg.devices[dev_idx].as_mut().unwrap().in_use = true;
    reg.handles[handle_idx] = Some(HandleSlot {
        device_idx: dev_idx,
        buf: [0; BLOCK_SIZE],
    });
    Ok(BlockHandle(handle_idx))
}

/// Frees `handle` and its buffer, making the underlying device available
/// to a future [`get_handle`] call.
pub fn release_handle(handle: BlockHandle) {
    let mut reg = REGISTRY.lock();
    if let Some(slot) = reg.handles[handle.0].take() {
        if let Some(dev) = reg.devices[slot.device_idx].as_mut() {
            dev.in_use = false;
        }
    }
}

/// Reads `block` through `handle`, validating it against the device's
/// reported size.
pub fn read(handle: BlockHandle, block: u32) -> KernelResult<[u8; BLOCK_SIZE]> {
    let mut reg = REGISTRY.lock();
    let dev_idx = reg.handles[handle.0].ok_or(KernelError::NoEnt)?.device_idx;
    let dev = reg.devices[dev_idx].ok_or(KernelError::NoEnt)?;
    if block >= dev.nblocks {
        return Err(KernelError::InvalidRequest);
    }

    let mut buf = [0u8; BLOCK_SIZE];
    if !(dev.read_blk)(dev.drvstate, block, &mut buf) {
        return Err(KernelError::IoError);
    }
    reg.handles[handle.0].as_mut().unwrap().buf = buf;
    Ok(buf)
}

/// True if the underlying medium was swapped since the last observation.
pub fn media_changed(handle: BlockHandle) -> bool {
    let reg = REGISTRY.lock();
    let Some(slot) = reg.handles[handle.0] else {
        return false;
    };
    let Some(dev) = reg.devices[slot.device_idx] else {
        return false;
    };
    (dev.media_changed)(dev.drvstate)
}
