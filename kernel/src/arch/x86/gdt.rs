//! 32-bit Global Descriptor Table and Task State Segment.
//!
//! Hand-rolled rather than built on the `x86_64` crate: that crate's
//! descriptor types describe the 64-bit long-mode GDT layout, which differs
//! bit-for-bit from the 32-bit segment descriptor this kernel needs.

use core::arch::asm;
use core::mem::size_of;

const GDT_RW: u8 = 1 << 1;
const GDT_E: u8 = 1 << 3;
const GDT_S: u8 = 1 << 4;
const GDT_KERNEL: u8 = 0 << 5;
const GDT_USER: u8 = 3 << 5;
const GDT_P: u8 = 1 << 7;
const GDT_TSS32_AVAILABLE: u8 = 0x9;

const GDT_DB: u8 = 1 << 2;
const GDT_G: u8 = 1 << 3;

pub mod selectors {
    pub const KERNEL_CODE: u16 = 0x08;
    pub const KERNEL_DATA: u16 = 0x10;
    pub const USER_CODE: u16 = 0x18 | 3;
    pub const USER_DATA: u16 = 0x20 | 3;
    pub const TSS: u16 = 0x28;
}

const INTERRUPT_STACK_PAGES: usize = 4;
const PAGE_SIZE: usize = 4096;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    limit_high_flags: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            limit_high_flags: 0,
            base_high: 0,
        }
    }

    const fn new(base: u32, limit: u32, access: u8, flags: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            limit_high_flags: (((limit >> 16) & 0x0F) as u8) | (flags << 4),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

/// Matches the hardware TSS32 layout: every 16-bit-in-a-32-bit-slot field
/// carries a `_h` padding twin.
#[repr(C, packed)]
struct TssStruct {
    link: u16,
    _link_h: u16,
    esp0: u32,
    ss0: u16,
    _ss0_h: u16,
    esp1: u32,
    ss1: u16,
    _ss1_h: u16,
    esp2: u32,
    ss2: u16,
    _ss2_h: u16,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u16,
    _es_h: u16,
    cs: u16,
    _cs_h: u16,
    ss: u16,
    _ss_h: u16,
    ds: u16,
    _ds_h: u16,
    fs: u16,
    _fs_h: u16,
    gs: u16,
    _gs_h: u16,
    ldt: u16,
    _ldt_h: u16,
    trap: u16,
    iomap: u16,
}

impl TssStruct {
    const fn zeroed() -> Self {
        // SAFETY: every field is a plain integer; the all-zero bit pattern
        // is a valid value for all of them.
        unsafe { core::mem::zeroed() }
    }
}

static mut GDT: [GdtEntry; 6] = [
    GdtEntry::null(),
    GdtEntry::new(0, 0xFFFFF, GDT_P | GDT_S | GDT_KERNEL | GDT_E | GDT_RW, GDT_G | GDT_DB),
    GdtEntry::new(0, 0xFFFFF, GDT_P | GDT_S | GDT_KERNEL | GDT_RW, GDT_G | GDT_DB),
    GdtEntry::new(0, 0xFFFFF, GDT_P | GDT_S | GDT_USER | GDT_E | GDT_RW, GDT_G | GDT_DB),
    GdtEntry::new(0, 0xFFFFF, GDT_P | GDT_S | GDT_USER | GDT_RW, GDT_G | GDT_DB),
    GdtEntry::null(), // patched to describe the TSS at init time
];

static mut TSS: TssStruct = TssStruct::zeroed();

/// Mirrors `TSS.esp0`: the "return to kernel" trampoline needs the current
/// kernel stack top without reading back through the packed TSS struct.
static mut KERNEL_STACK_TOP: u32 = 0;

/// Loads the GDT, builds the TSS, and loads the task register.
///
/// # Safety
/// Must run once, early in boot, before any ring transition and before
/// interrupts are enabled.
pub unsafe fn init() {
    let tss_base = &raw const TSS as u32;
    let tss_limit = (size_of::<TssStruct>() - 1) as u32;

    // SAFETY: sole writer at this point in boot, before interrupts are on.
    unsafe {
        GDT[5] = GdtEntry::new(tss_base, tss_limit, GDT_P | GDT_TSS32_AVAILABLE, 0);
    }

    let gdtp = GdtPointer {
        limit: (size_of::<[GdtEntry; 6]>() - 1) as u16,
        base: &raw const GDT as u32,
    };

    // SAFETY: `gdtp` points at a 6-entry table matching `selectors` above;
    // `lgdt` takes effect on the next far jump/segment reload, neither of
    // which happens before this function returns.
    unsafe {
        asm!("lgdt [{}]", in(reg) &gdtp, options(readonly, nostack, preserves_flags));
    }

    // SAFETY: same boot-time single-writer precondition as above.
    unsafe {
        set_up_tss();
    }
}

unsafe fn set_up_tss() {
    let esp0 = alloc_interrupt_stack();

    // SAFETY: single-writer during boot.
    unsafe {
        TSS.ss0 = selectors::KERNEL_DATA;
        TSS.esp0 = esp0;
        TSS.iomap = size_of::<TssStruct>() as u16;
        KERNEL_STACK_TOP = esp0;
    }

    // SAFETY: selector names a present, non-busy TSS descriptor just built
    // above.
    unsafe {
        asm!("ltr {:x}", in(reg) selectors::TSS, options(nostack, preserves_flags));
    }
}

/// Carves a fixed interrupt stack out of the kernel's static image rather
/// than the frame allocator, which is not yet initialized this early.
fn alloc_interrupt_stack() -> u32 {
    static STACK: [u8; INTERRUPT_STACK_PAGES * PAGE_SIZE] = [0; INTERRUPT_STACK_PAGES * PAGE_SIZE];
    (&raw const STACK as u32) + (INTERRUPT_STACK_PAGES * PAGE_SIZE) as u32
}

/// Updates `esp0` in the TSS so the next ring-3-to-ring-0 transition lands
/// on the given kernel stack. Called when switching the current process.
pub fn set_kernel_stack(esp0: u32) {
    // SAFETY: only the current-process machinery calls this, serialized by
    // the non-preemptive kernel model.
    unsafe {
        TSS.esp0 = esp0;
        KERNEL_STACK_TOP = esp0;
    }
}

/// Current `esp0`: the stack the "return to kernel" trampoline resumes on.
pub fn current_kernel_stack_top() -> u32 {
    // SAFETY: plain integer read; racing with `set_kernel_stack` cannot
    // happen under the non-preemptive, single-CPU kernel model.
    unsafe { KERNEL_STACK_TOP }
}
