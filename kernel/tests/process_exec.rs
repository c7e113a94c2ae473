//! Exercises the process stack (`push`/`setup_cpu_ctx`/`pop`) and cwd
//! resolution against a tiny in-memory filesystem standing in for a real
//! disk, end to end: mount, open, ELF-load, push a child, tear it back
//! down.

#![no_std]
#![no_main]

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use keel_kernel::arch::x86::multiboot::BootInfo;
use keel_kernel::error::{KernelError, KernelResult};
use keel_kernel::fs::{self, Inode, InodeKind, Superblock};
use keel_kernel::{drivers, elf, irq, mm, process, serial_println};
use keel_kernel::{exit_qemu, QemuExitCode};

const TEST_ENTRY_VADDR: u32 = 0x0040_0000;

/// Builds a minimal one-segment ELF32 executable: a 52-byte header, one
/// 32-byte `PT_LOAD` program header, then 4 bytes of segment data loaded
/// into a page-sized, zero-filled mapping at [`TEST_ENTRY_VADDR`].
fn build_test_elf() -> Vec<u8> {
    const HEADER_SIZE: usize = 52;
    const PH_SIZE: usize = 32;
    const PH_OFFSET: u32 = HEADER_SIZE as u32;
    const SEG_OFFSET: u32 = PH_OFFSET + PH_SIZE as u32;
    const SEG_FILESZ: u32 = 4;
    const SEG_MEMSZ: u32 = 4096;

    let mut buf = alloc::vec![0u8; (SEG_OFFSET + SEG_FILESZ) as usize];

    buf[0..4].copy_from_slice(&0x464C_457Fu32.to_le_bytes());
    buf[4] = 1; // 32-bit
    buf[5] = 1; // little-endian
    buf[6] = 1; // header version
    buf[7] = 0; // SysV ABI
    buf[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    buf[18..20].copy_from_slice(&0x03u16.to_le_bytes()); // EM_386
    buf[20..24].copy_from_slice(&1u32.to_le_bytes());
    buf[24..28].copy_from_slice(&TEST_ENTRY_VADDR.to_le_bytes());
    buf[28..32].copy_from_slice(&PH_OFFSET.to_le_bytes());
    buf[42..44].copy_from_slice(&(PH_SIZE as u16).to_le_bytes());
    buf[44..46].copy_from_slice(&1u16.to_le_bytes()); // one program header

    let ph = &mut buf[PH_OFFSET as usize..(PH_OFFSET as usize + PH_SIZE)];
    ph[0..4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    ph[4..8].copy_from_slice(&SEG_OFFSET.to_le_bytes());
    ph[8..12].copy_from_slice(&TEST_ENTRY_VADDR.to_le_bytes());
    ph[16..20].copy_from_slice(&SEG_FILESZ.to_le_bytes());
    ph[20..24].copy_from_slice(&SEG_MEMSZ.to_le_bytes());

    buf[SEG_OFFSET as usize..].copy_from_slice(&[0x90, 0x90, 0x90, 0xF4]); // nop*3, hlt

    buf
}

struct MemFile {
    data: Arc<[u8]>,
}

impl Inode for MemFile {
    fn kind(&self) -> InodeKind {
        InodeKind::File
    }

    fn size(&self) -> u32 {
        self.data.len() as u32
    }

    fn dup(&self) -> Box<dyn Inode> {
        Box::new(MemFile { data: self.data.clone() })
    }

    fn read(&self, buf: &mut [u8], offset: u32) -> KernelResult<usize> {
        let off = offset as usize;
        if off >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - off);
        buf[..n].copy_from_slice(&self.data[off..off + n]);
        Ok(n)
    }
}

struct MemRoot {
    init: Arc<[u8]>,
}

impl Inode for MemRoot {
    fn kind(&self) -> InodeKind {
        InodeKind::Dir
    }

    fn size(&self) -> u32 {
        0
    }

    fn dup(&self) -> Box<dyn Inode> {
        Box::new(MemRoot { init: self.init.clone() })
    }

    fn lookup(&self, name: &str) -> KernelResult<Box<dyn Inode>> {
        if name == "init" {
            Ok(Box::new(MemFile { data: self.init.clone() }))
        } else {
            Err(KernelError::NoEnt)
        }
    }
}

fn mount_memfs(_dev: &str) -> KernelResult<Superblock> {
    let init: Arc<[u8]> = build_test_elf().into();
    Ok(Superblock::new(Box::new(MemRoot { init }), || {}))
}

#[unsafe(no_mangle)]
pub extern "C" fn test_kernel_main(boot_info: BootInfo) -> ! {
    serial_println!("running process_exec");

    mm::init(&boot_info);
    irq::init();
    drivers::init();
    fs::init();
    process::init().expect("process::init");

    fs::register_fs_type("memfs", mount_memfs).expect("register_fs_type");
    fs::mount("test0", "/", "memfs").expect("mount");

    test_push_runs_elf_and_pop_returns();
    test_init_process_refuses_pop();
    test_cwd_resolves_relative_paths();

    serial_println!("process_exec: all tests passed");
    exit_qemu(QemuExitCode::Success)
}

fn test_push_runs_elf_and_pop_returns() {
    process::push().expect("process::push");
    let child = process::current();
    assert_eq!(child.pid, 1);
    assert!(child.parent.is_some());

    // Loaded into the child's own address space, made current by `push`.
    let file = fs::vfs_open("0:/init").expect("vfs_open");
    let entry = elf::load(&file).expect("elf::load");
    fs::vfs_close(file);
    assert_eq!(entry, TEST_ENTRY_VADDR);

    let child = process::current();
    process::setup_cpu_ctx(child, entry);
    assert_eq!(process::current().cpu_context.eip, TEST_ENTRY_VADDR);
    assert_ne!(process::current().cpu_context.eflags & 0x200, 0, "IF must be set for a freshly loaded process");

    process::pop().expect("process::pop");
    let parent = process::current();
    assert_eq!(parent.pid, 0);
    assert!(parent.parent.is_none());
}

fn test_init_process_refuses_pop() {
    assert_eq!(process::pop(), Err(KernelError::NotPermitted));
}

fn test_cwd_resolves_relative_paths() {
    let pcb = process::current();
    process::cwd::chdir(pcb, "0:/").expect("chdir to root");
    assert_eq!(process::cwd::getcwd(pcb), "0:");

    let resolved = process::cwd::resolve(pcb, "init").expect("resolve relative path");
    assert_eq!(resolved.render(), "0:/init");
}
