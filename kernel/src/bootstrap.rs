//! Multi-stage kernel initialization.
//!
//! Mirrors the init ordering of a traditional monolithic boot sequence:
//! logging before anything that prints, memory before anything that
//! allocates, interrupts before anything that waits on them, the system
//! disk mounted last, right before control passes to the init program.

use crate::arch::x86::multiboot::BootInfo;
use crate::{drivers, error::KernelResult, fs, irq, mm, process, timer};

const SYSTEM_DISK_DEV: &str = "fd0";
const SYSTEM_DISK_FS: &str = "fat";
const INIT_BIN: &str = "0:/BIN/INIT";

/// Runs every initialization stage in order and starts the init process.
/// Never returns.
pub fn kernel_main(boot_info: BootInfo) -> ! {
    crate::serial::init();
    println!("Keel Kernel v{}", env!("CARGO_PKG_VERSION"));
    println!("[BOOTSTRAP] Stage 1: memory management");

    mm::init(&boot_info);
    println!("[BOOTSTRAP] Memory management initialized");

    println!("[BOOTSTRAP] Stage 2: interrupts and timer");
    irq::init();
    crate::arch::x86::enable_interrupts();
    timer::init();
    println!("[BOOTSTRAP] Interrupts and timer initialized");

    println!("[BOOTSTRAP] Stage 3: drivers and block devices");
    drivers::init();
    println!("[BOOTSTRAP] Drivers initialized");

    println!("[BOOTSTRAP] Stage 4: virtual filesystem");
    fs::init();
    println!("[BOOTSTRAP] VFS initialized");

    println!("[BOOTSTRAP] Stage 5: process management");
    if let Err(e) = process::init() {
        panic!("process management init failed: {}", e);
    }
    println!("[BOOTSTRAP] Process management initialized");

    match start_init_process() {
        Ok(()) => unreachable!("start_init_process only returns on failure"),
        Err(e) => panic!("failed to start init process: {}", e),
    }
}

/// Mounts the system disk and execs the init binary, handing control to
/// userspace. Only returns on failure.
fn start_init_process() -> KernelResult<()> {
    println!("[INIT] Mounting system disk ({})", SYSTEM_DISK_DEV);
    fs::mount(SYSTEM_DISK_DEV, "/", SYSTEM_DISK_FS)?;

    let file = fs::vfs_open(INIT_BIN)?;
    let entry = crate::elf::load(&file)?;
    fs::vfs_close(file);

    let pcb = process::current();
    process::setup_cpu_ctx(pcb, entry);

    println!("[INIT] Transferring control to {}", INIT_BIN);
    // SAFETY: `setup_cpu_ctx` just built a valid user-mode context for the
    // freshly ELF-loaded init program, and its VAS is already the active
    // one (the only VAS that exists this early in boot).
    unsafe {
        crate::arch::x86::context::go_userspace(&pcb.cpu_context);
    }
}
