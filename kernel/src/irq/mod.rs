//! CPU exception dispatch and hardware IRQ registration.
//!
//! Grounded on the original interrupt core: up to two handlers per IRQ
//! line, spurious IRQ7/IRQ15 checks, and exceptions routed through a
//! dishonorable exit whenever the faulting instruction lives in the user
//! half of the address space.

use spin::Mutex;

use crate::arch::x86::idt::RawInterruptFrame;
use crate::mm::vmm;

const NUM_IRQ: usize = 16;
const MAX_HANDLERS_PER_IRQ: usize = 2;

pub type IrqHandler = fn();

struct IrqTable {
    handlers: [[Option<IrqHandler>; MAX_HANDLERS_PER_IRQ]; NUM_IRQ],
}

impl IrqTable {
    const fn new() -> Self {
        Self {
            handlers: [[None; MAX_HANDLERS_PER_IRQ]; NUM_IRQ],
        }
    }
}

static IRQ_TABLE: Mutex<IrqTable> = Mutex::new(IrqTable::new());

pub fn init() {
    // SAFETY: no handler is registered yet; unmasking happens per-handler
    // in `register_irq`.
}

/// Registers `handler` for `irq`, panicking if `irq` is out of range, the
/// handler is already registered, or all slots for this line are full.
pub fn register_irq(irq: u8, handler: IrqHandler) {
    assert!((irq as usize) < NUM_IRQ, "invalid IRQ number {irq}");

    let _guard = crate::arch::x86::disable_interrupts();
    let mut table = IRQ_TABLE.lock();
    let slots = &mut table.handlers[irq as usize];

    assert!(
        !slots.iter().any(|s| *s == Some(handler)),
        "IRQ {irq} handler already registered"
    );

    let free = slots
        .iter()
        .position(|s| s.is_none())
        .unwrap_or_else(|| panic!("no free handler slot for IRQ {irq}"));
    slots[free] = Some(handler);
    drop(table);

    // SAFETY: the handler is registered above before the line is unmasked.
    unsafe {
        crate::arch::x86::pic_unmask_irq(irq);
    }
}

/// Unregisters `handler` for `irq`, panicking if it was never registered.
pub fn unregister_irq(irq: u8, handler: IrqHandler) {
    assert!((irq as usize) < NUM_IRQ, "invalid IRQ number {irq}");

    let _guard = crate::arch::x86::disable_interrupts();
    let mut table = IRQ_TABLE.lock();
    let slots = &mut table.handlers[irq as usize];

    let slot = slots
        .iter()
        .position(|s| *s == Some(handler))
        .unwrap_or_else(|| panic!("IRQ {irq} handler not registered"));
    slots[slot] = None;
}

/// Called from [`crate::arch::x86::idt::common_interrupt_handler`] for
/// vectors 32-47. Checks for a spurious IRQ7/15 before dispatching every
/// registered handler in registration order, then sends EOI.
pub fn handle_irq(irq: u8) {
    if (irq == 7 || irq == 15) && crate::arch::x86::pic_check_spurious(irq) {
        return;
    }

    let handlers = {
        let table = IRQ_TABLE.lock();
        table.handlers[irq as usize]
    };
    for handler in handlers.into_iter().flatten() {
        handler();
    }

    crate::arch::x86::pic_send_eoi(irq);
}

/// Called from [`crate::arch::x86::idt::common_interrupt_handler`] for
/// vectors 0-31. If the faulting instruction lies in the user half of the
/// address space, the offending process is torn down via a dishonorable
/// exit; otherwise a kernel-mode exception is always fatal.
pub fn handle_exception(vector: u8, frame: &mut RawInterruptFrame) {
    if vmm::validate_user_ptr(frame.eip as usize, 1) {
        crate::syscall::redirect_to_dishonorable_exit(frame);
        return;
    }

    panic!(
        "unhandled CPU exception {} ({}) at eip=0x{:x} error_code=0x{:x}",
        vector,
        exception_name(vector),
        frame.eip,
        frame.error_code,
    );
}

fn exception_name(vector: u8) -> &'static str {
    match vector {
        0 => "divide error",
        1 => "debug",
        2 => "non-maskable interrupt",
        3 => "breakpoint",
        4 => "overflow",
        5 => "bound range exceeded",
        6 => "invalid opcode",
        7 => "device not available",
        8 => "double fault",
        10 => "invalid TSS",
        11 => "segment not present",
        12 => "stack-segment fault",
        13 => "general protection fault",
        14 => "page fault",
        16 => "x87 floating-point exception",
        17 => "alignment check",
        18 => "machine check",
        19 => "SIMD floating-point exception",
        _ => "reserved",
    }
}
