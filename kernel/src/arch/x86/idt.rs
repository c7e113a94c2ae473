//! 32-bit Interrupt Descriptor Table: 49 gates (0-31 exceptions, 32-47 IRQs
//! remapped behind the PIC at offset 0x20, 48 the syscall gate).
//!
//! Hand-rolled instead of built on the `x86_64` crate's `extern
//! "x86-interrupt"` ABI, which targets 64-bit gate descriptors and does not
//! exist in a 32-bit form; every vector gets a `naked_asm` stub that saves
//! registers and calls [`common_interrupt_handler`].

use core::arch::{asm, naked_asm};
use core::mem::size_of;

use super::gdt::selectors;
use crate::arch::x86::context::CpuContext;
use crate::{irq, syscall};

const IDT_ENTRIES: usize = 49;
const SYSCALL_VECTOR: u8 = 48;
pub const IRQ_VEC_OFFSET: u8 = 0x20;

const GATE_PRESENT: u8 = 1 << 7;
const GATE_32BIT_INTERRUPT: u8 = 0xE;
const GATE_DPL3: u8 = 3 << 5;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, dpl3: bool) -> Self {
        let mut type_attr = GATE_PRESENT | GATE_32BIT_INTERRUPT;
        if dpl3 {
            type_attr |= GATE_DPL3;
        }
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector: selectors::KERNEL_CODE,
            zero: 0,
            type_attr,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

static mut IDT: [IdtEntry; IDT_ENTRIES] = [IdtEntry::missing(); IDT_ENTRIES];

/// Register layout a trampoline stub pushes before calling the common
/// handler. Distinct from [`CpuContext`]: this is the raw, vector-specific
/// stack shape; the syscall and exception paths copy the fields they need
/// out of it into a `CpuContext` snapshot.
#[repr(C)]
pub struct RawInterruptFrame {
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub user_esp: u32,
    pub user_ss: u32,
}

impl RawInterruptFrame {
    pub fn to_cpu_context(&self) -> CpuContext {
        CpuContext {
            edi: self.edi,
            esi: self.esi,
            edx: self.edx,
            ecx: self.ecx,
            ebx: self.ebx,
            eax: self.eax,
            ds: self.ds,
            eip: self.eip,
            cs: self.cs,
            eflags: self.eflags,
            esp: self.user_esp,
            ss: self.user_ss,
            ebp: self.ebp,
        }
    }
}

/// Exception vectors that push a hardware error code.
const fn has_error_code(vector: u8) -> bool {
    matches!(vector, 8 | 10 | 11 | 12 | 13 | 14 | 17 | 21 | 29 | 30)
}

macro_rules! isr_stub_err {
    ($name:ident, $vector:expr) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            naked_asm!(
                "push {v}",
                "jmp {common}",
                v = const $vector,
                common = sym common_stub,
            )
        }
    };
}

macro_rules! isr_stub_noerr {
    ($name:ident, $vector:expr) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            naked_asm!(
                "push 0",
                "push {v}",
                "jmp {common}",
                v = const $vector,
                common = sym common_stub,
            )
        }
    };
}

// Dispatches to the err/noerr variant per vector, matching `has_error_code`'s
// list exactly (macro_rules can't call a const fn to pick the arm).
macro_rules! isr_stub {
    ($name:ident, 8) => { isr_stub_err!($name, 8); };
    ($name:ident, 10) => { isr_stub_err!($name, 10); };
    ($name:ident, 11) => { isr_stub_err!($name, 11); };
    ($name:ident, 12) => { isr_stub_err!($name, 12); };
    ($name:ident, 13) => { isr_stub_err!($name, 13); };
    ($name:ident, 14) => { isr_stub_err!($name, 14); };
    ($name:ident, 17) => { isr_stub_err!($name, 17); };
    ($name:ident, 21) => { isr_stub_err!($name, 21); };
    ($name:ident, 29) => { isr_stub_err!($name, 29); };
    ($name:ident, 30) => { isr_stub_err!($name, 30); };
    ($name:ident, $vector:expr) => { isr_stub_noerr!($name, $vector); };
}

#[unsafe(naked)]
unsafe extern "C" fn common_stub() {
    naked_asm!(
        "push ds",
        "push edi",
        "push esi",
        "push ebp",
        "push esp",
        "push ebx",
        "push edx",
        "push ecx",
        "push eax",
        "mov ax, {kdata}",
        "mov ds, ax",
        "mov es, ax",
        "push esp",
        "call {handler}",
        "add esp, 4",
        "pop eax",
        "pop ecx",
        "pop edx",
        "pop ebx",
        "add esp, 4", // discard saved esp
        "pop ebp",
        "pop esi",
        "pop edi",
        "pop ds",
        "add esp, 8", // vector, error_code
        "iretd",
        kdata = const selectors::KERNEL_DATA,
        handler = sym common_interrupt_handler,
    );
}

/// Dispatches by vector number: 0-31 exceptions, 32-47 IRQs, 48 syscall.
///
/// # Safety
/// Called only from [`common_stub`] with a valid pointer to the frame it
/// just built on the current stack.
#[unsafe(no_mangle)]
unsafe extern "C" fn common_interrupt_handler(frame: *mut RawInterruptFrame) {
    // SAFETY: `frame` is the address of a `RawInterruptFrame`-shaped region
    // `common_stub` just constructed on its own stack.
    let frame = unsafe { &mut *frame };
    let vector = frame.vector as u8;

    if vector < IRQ_VEC_OFFSET {
        irq::handle_exception(vector, frame);
    } else if vector < SYSCALL_VECTOR {
        irq::handle_irq(vector - IRQ_VEC_OFFSET);
    } else {
        syscall::handle_syscall(frame);
    }
}

macro_rules! build_stubs {
    ($($n:literal => $name:ident),* $(,)?) => {
        $( isr_stub!($name, $n); )*
        fn stub_addr(vector: u8) -> u32 {
            match vector {
                $( $n => $name as usize as u32, )*
                _ => unreachable!("vector out of range"),
            }
        }
    };
}

build_stubs! {
    0 => isr0, 1 => isr1, 2 => isr2, 3 => isr3, 4 => isr4, 5 => isr5,
    6 => isr6, 7 => isr7, 8 => isr8, 9 => isr9, 10 => isr10, 11 => isr11,
    12 => isr12, 13 => isr13, 14 => isr14, 15 => isr15, 16 => isr16,
    17 => isr17, 18 => isr18, 19 => isr19, 20 => isr20, 21 => isr21,
    22 => isr22, 23 => isr23, 24 => isr24, 25 => isr25, 26 => isr26,
    27 => isr27, 28 => isr28, 29 => isr29, 30 => isr30, 31 => isr31,
    32 => isr32, 33 => isr33, 34 => isr34, 35 => isr35, 36 => isr36,
    37 => isr37, 38 => isr38, 39 => isr39, 40 => isr40, 41 => isr41,
    42 => isr42, 43 => isr43, 44 => isr44, 45 => isr45, 46 => isr46,
    47 => isr47, 48 => isr48,
}

/// Builds all 49 gates and loads the IDT.
///
/// # Safety
/// Must run once, after [`super::gdt::init`], before `sti`.
pub unsafe fn init() {
    for vector in 0..IDT_ENTRIES as u8 {
        let dpl3 = vector == SYSCALL_VECTOR;
        // SAFETY: sole writer during boot.
        unsafe {
            IDT[vector as usize] = IdtEntry::new(stub_addr(vector), dpl3);
        }
    }

    let idtp = IdtPointer {
        limit: (size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
        base: &raw const IDT as u32,
    };

    // SAFETY: `idtp` describes the table just populated above.
    unsafe {
        asm!("lidt [{}]", in(reg) &idtp, options(readonly, nostack, preserves_flags));
    }
}
