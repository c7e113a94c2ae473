//! Block device drivers: floppy controller, ramdisk, and a synthetic
//! pattern-filling device for exercising the block layer without real
//! hardware.
//!
//! The exact FDC byte-level protocol (`send_byte`/FIFO timing/DOR bits)
//! sits outside the core's own design surface; this module follows the
//! original driver's command sequence closely enough to drive real
//! hardware but does not chase its every retry/CMOS-detection corner.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::fs::blockdev::{self, BLOCK_SIZE};
use crate::{irq, timer};

pub fn init() {
    fdc::init();
    ramdisk::create(0, 512);
    dummyblk::init(0, 64);
}

/// Leaks a short owned string into a `&'static str` major name. Device
/// registrations live for the kernel's lifetime, so this never needs to
/// be freed.
fn leak_major(s: alloc::string::String) -> &'static str {
    Box::leak(s.into_boxed_str())
}

mod dummyblk {
    use super::*;

    fn read_op(id: usize, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> bool {
        for chunk in buf.chunks_exact_mut(8) {
            chunk[0..4].copy_from_slice(&(id as u32).to_le_bytes());
            chunk[4..8].copy_from_slice(&block.to_le_bytes());
        }
        true
    }

    pub fn init(id: usize, nblocks: u32) {
        let major = leak_major(alloc::format!("d{id}"));
        if let Err(e) = blockdev::register(major, nblocks, id, read_op, None) {
            println!("[DUMMYBLK] {id} registration failed: {e}");
        }
    }
}

mod ramdisk {
    use super::*;

    static DISKS: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

    fn read_op(drvstate: usize, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> bool {
        let disks = DISKS.lock();
        let Some(disk) = disks.get(drvstate) else { return false };
        let off = block as usize * BLOCK_SIZE;
        let Some(src) = disk.get(off..off + BLOCK_SIZE) else { return false };
        buf.copy_from_slice(src);
        true
    }

    /// Creates an `id`-numbered ramdisk of `nblocks` zeroed blocks and
    /// registers it as `rd<id>`.
    pub fn create(id: usize, nblocks: u32) {
        let drvstate = {
            let mut disks = DISKS.lock();
            disks.push(vec![0u8; nblocks as usize * BLOCK_SIZE]);
            disks.len() - 1
        };
        let major = leak_major(alloc::format!("rd{id}"));
        if let Err(e) = blockdev::register(major, nblocks, drvstate, read_op, None) {
            println!("[RAMDISK] {id} registration failed: {e}");
        }
    }
}

mod fdc {
    use super::*;

    const PORT_DOR: u16 = 0x3F2;
    const PORT_MSR: u16 = 0x3F4;
    const PORT_FIFO: u16 = 0x3F5;
    const FLOPPY_IRQ: u8 = 6;

    const CMD_SPECIFY: u8 = 3;
    const CMD_SENSE_DRIVE_STATUS: u8 = 4;
    const CMD_READ_DATA: u8 = 6;
    const CMD_RECALIBRATE: u8 = 7;
    const CMD_SENSE_INTERRUPT: u8 = 8;
    const CMD_VERSION: u8 = 16;
    const CMD_MF: u8 = 1 << 6;

    const CYLS: u32 = 80;
    const HEADS: u32 = 2;
    const SECTORS: u32 = 18;
    const NBLOCKS: u32 = CYLS * HEADS * SECTORS;

    const CMD_TIMEOUT_MS: u64 = 100;
    const RW_TIMEOUT_MS: u64 = 3000;
    const MOTOR_SPINUP_MS: u32 = 300;
    const MOTOR_OFF_DELAY_MS: u64 = 2000;

    static IRQ6_FIRED: AtomicBool = AtomicBool::new(false);

    struct Drive {
        motor_on: bool,
        motor_off_timer: timer::TimerHandle,
    }

    static DRIVE0: Mutex<Drive> = Mutex::new(Drive { motor_on: false, motor_off_timer: timer::TIMER_HANDLE_NULL });

    fn irq6_handler() {
        IRQ6_FIRED.store(true, Ordering::Release);
    }

    fn wait_irq6(timeout_ms: u64) -> bool {
        let start = timer::get_system_ms();
        while !IRQ6_FIRED.swap(false, Ordering::AcqRel) {
            if timer::get_system_ms().wrapping_sub(start) > timeout_ms {
                return false;
            }
            core::hint::spin_loop();
        }
        true
    }

    fn read_dor() -> u8 {
        // SAFETY: PORT_DOR is the fixed 8042-adjacent FDC DOR register.
        unsafe { crate::arch::x86::inb(PORT_DOR) }
    }

    fn write_dor(val: u8) {
        // SAFETY: PORT_DOR is the fixed FDC Digital Output Register.
        unsafe { crate::arch::x86::outb(PORT_DOR, val) };
    }

    fn read_msr() -> u8 {
        // SAFETY: PORT_MSR is the fixed, read-only FDC Main Status Register.
        unsafe { crate::arch::x86::inb(PORT_MSR) }
    }

    fn send_byte(byte: u8) -> bool {
        let start = timer::get_system_ms();
        loop {
            let msr = read_msr();
            if msr & 0x80 != 0 && msr & 0x40 == 0 {
                break;
            }
            if timer::get_system_ms().wrapping_sub(start) > CMD_TIMEOUT_MS {
                return false;
            }
        }
        // SAFETY: PORT_FIFO accepts a command/parameter byte once RQM is set
        // and DIO indicates the controller expects input, checked above.
        unsafe { crate::arch::x86::outb(PORT_FIFO, byte) };
        true
    }

    fn read_data_byte(timeout_ms: u64) -> Option<u8> {
        let start = timer::get_system_ms();
        loop {
            let msr = read_msr();
            if msr & 0x80 != 0 && msr & 0x40 != 0 {
                break;
            }
            if timer::get_system_ms().wrapping_sub(start) > timeout_ms {
                return None;
            }
        }
        // SAFETY: PORT_FIFO holds a result byte once RQM+DIO are set, checked
        // above.
        Some(unsafe { crate::arch::x86::inb(PORT_FIFO) })
    }

    fn cmd_version() -> Option<u8> {
        if !send_byte(CMD_VERSION) {
            return None;
        }
        read_data_byte(CMD_TIMEOUT_MS)
    }

    fn cmd_specify(srt: u8, hut: u8, hlt: u8) -> bool {
        send_byte(CMD_SPECIFY) && send_byte((srt << 4) | (hut & 0xF)) && send_byte(hlt << 1)
    }

    fn cmd_sense_interrupt() -> Option<(u8, u8)> {
        if !send_byte(CMD_SENSE_INTERRUPT) {
            return None;
        }
        let st0 = read_data_byte(CMD_TIMEOUT_MS)?;
        let cyl = read_data_byte(CMD_TIMEOUT_MS)?;
        Some((st0, cyl))
    }

    fn cmd_recalibrate() -> bool {
        IRQ6_FIRED.store(false, Ordering::Release);
        if !send_byte(CMD_RECALIBRATE) || !send_byte(0) {
            return false;
        }
        if !wait_irq6(RW_TIMEOUT_MS) {
            return false;
        }
        matches!(cmd_sense_interrupt(), Some((st0, cyl)) if st0 & 0xC0 == 0 && cyl == 0)
    }

    fn reset() -> bool {
        write_dor(0);
        write_dor(0x0C);
        wait_irq6(RW_TIMEOUT_MS) && cmd_sense_interrupt().is_some() && cmd_specify(8, 0, 5)
    }

    fn do_fdc_init() -> bool {
        if !reset() {
            return false;
        }
        matches!(cmd_version(), Some(0x80) | Some(0x90))
    }

    fn set_motor(drive: &mut Drive, on: bool) {
        if drive.motor_on == on {
            return;
        }
        let mut dor = read_dor();
        if on {
            dor |= 0x10 | 0x04 | 0x08;
        } else {
            dor &= !0x10;
        }
        write_dor(dor);
        drive.motor_on = on;
        if on {
            timer::delay_ms(MOTOR_SPINUP_MS);
        }
    }

    fn motor_off_cb(_ctx: usize) {
        let mut drive = DRIVE0.lock();
        set_motor(&mut drive, false);
        drive.motor_off_timer = timer::TIMER_HANDLE_NULL;
    }

    fn lba_to_chs(lba: u32) -> (u8, u8, u8) {
        let cyl = lba / (HEADS * SECTORS);
        let head = (lba / SECTORS) % HEADS;
        let sect = lba % SECTORS + 1;
        (cyl as u8, head as u8, sect as u8)
    }

    fn cmd_read_sector(buf: &mut [u8; BLOCK_SIZE], cyl: u8, head: u8, sect: u8) -> bool {
        IRQ6_FIRED.store(false, Ordering::Release);
        let ok = send_byte(CMD_READ_DATA | CMD_MF)
            && send_byte(head << 2)
            && send_byte(cyl)
            && send_byte(head)
            && send_byte(sect)
            && send_byte(2) // 512 bytes/sector
            && send_byte(SECTORS as u8)
            && send_byte(0x1B) // GAP3 for 3.5" 1.44MB
            && send_byte(0xFF);
        if !ok {
            return false;
        }
        for byte in buf.iter_mut() {
            match read_data_byte(RW_TIMEOUT_MS) {
                Some(b) => *byte = b,
                None => return false,
            }
        }
        wait_irq6(RW_TIMEOUT_MS) && matches!(cmd_sense_interrupt(), Some((st0, _)) if st0 & 0xC0 == 0)
    }

    fn read_req(_drvstate: usize, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> bool {
        if block >= NBLOCKS {
            return false;
        }
        let mut drive = DRIVE0.lock();
        timer::clear(drive.motor_off_timer);
        set_motor(&mut drive, true);

        let (cyl, head, sect) = lba_to_chs(block);
        let ok = cmd_read_sector(buf, cyl, head, sect);

        drive.motor_off_timer = timer::set(MOTOR_OFF_DELAY_MS, timer::TimerType::Oneshot, motor_off_cb, 0);
        ok
    }

    pub fn init() {
        irq::register_irq(FLOPPY_IRQ, irq6_handler);
        if !do_fdc_init() {
            println!("[FDC] controller init failed; fd0 unavailable");
            irq::unregister_irq(FLOPPY_IRQ, irq6_handler);
            return;
        }
        if !cmd_recalibrate() {
            println!("[FDC] drive 0 recalibrate failed; fd0 unavailable");
            return;
        }
        if let Err(e) = blockdev::register("fd0", NBLOCKS, 0, read_req, None) {
            println!("[FDC] fd0 registration failed: {e}");
        }
    }

    // Silences unused-const warnings for a command kept for documentation
    // parity with the original driver's command enum.
    const _: u8 = CMD_SENSE_DRIVE_STATUS;
}
