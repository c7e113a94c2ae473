//! PS/2 controller and keyboard subsystem.
//!
//! `ps2` is the generic byte-level controller: it owns the data/status
//! ports and calls back into whichever device is attached on every byte
//! IRQ1 delivers. The subsystem above decodes those bytes into keysyms via
//! `pc_keyboard`, tracks modifier state, and publishes `{keysym, mod_state}`
//! events to a fixed list of subscribers — [`super::console`] is the only
//! one today, turning events back into the ASCII byte queue it reads from.

use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use pc_keyboard::{layouts, DecodedKey, HandleControl, KeyCode, KeyState, Keyboard, ScancodeSet1};
use spin::Mutex;

use crate::irq;

/// Generic PS/2 controller byte-level interface.
mod ps2 {
    use super::*;

    const DATA_PORT: u16 = 0x60;
    const STATUS_PORT: u16 = 0x64;
    const KEYBOARD_IRQ: u8 = 1;

    pub type ByteCallback = fn(u8);

    static CALLBACK: Mutex<Option<ByteCallback>> = Mutex::new(None);

    /// Registers the device callback invoked on every received byte.
    pub fn set_callback(cb: ByteCallback) {
        *CALLBACK.lock() = Some(cb);
    }

    /// Sends a command byte to the device on the data port, waiting for
    /// the input buffer to drain first.
    pub fn send_data(byte: u8) {
        // SAFETY: standard 8042 input-buffer-full poll before writing.
        unsafe {
            while crate::arch::x86::inb(STATUS_PORT) & 0x02 != 0 {
                core::hint::spin_loop();
            }
            crate::arch::x86::outb(DATA_PORT, byte);
        }
    }

    fn irq1_handler() {
        // SAFETY: called from IRQ1 context; the status register confirms
        // output-buffer-full before the data read.
        let byte = unsafe { crate::arch::x86::inb(DATA_PORT) };
        if let Some(cb) = *CALLBACK.lock() {
            cb(byte);
        }
    }

    pub fn enable() {
        irq::register_irq(KEYBOARD_IRQ, irq1_handler);
    }

    pub fn disable() {
        irq::unregister_irq(KEYBOARD_IRQ, irq1_handler);
    }
}

pub const MOD_SHIFT: u8 = 0x01;
pub const MOD_CTRL: u8 = 0x02;
pub const MOD_ALT: u8 = 0x04;
pub const MOD_SUPER: u8 = 0x08;

static MODIFIER_STATE: AtomicU8 = AtomicU8::new(0);

/// A decoded key transition, published to every subscriber.
#[derive(Debug, Clone, Copy)]
pub struct KeyEvent {
    pub keysym: DecodedKey,
    pub mod_state: u8,
}

pub type Subscriber = fn(KeyEvent);
const MAX_SUBSCRIBERS: usize = 4;
static SUBSCRIBERS: Mutex<[Option<Subscriber>; MAX_SUBSCRIBERS]> = Mutex::new([None; MAX_SUBSCRIBERS]);

/// Registers a callback invoked on every decoded key event. Silently
/// drops the registration if the subscriber table is full.
pub fn subscribe(cb: Subscriber) {
    let mut subs = SUBSCRIBERS.lock();
    if let Some(slot) = subs.iter_mut().find(|s| s.is_none()) {
        *slot = Some(cb);
    }
}

fn publish(event: KeyEvent) {
    let subs = *SUBSCRIBERS.lock();
    for cb in subs.into_iter().flatten() {
        cb(event);
    }
}

const QUEUE_SIZE: usize = 256;

/// Single-producer (IRQ1) / single-consumer (console) ring buffer of
/// decoded ASCII bytes.
struct ByteQueue {
    buf: [u8; QUEUE_SIZE],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl ByteQueue {
    const fn new() -> Self {
        Self { buf: [0; QUEUE_SIZE], head: AtomicUsize::new(0), tail: AtomicUsize::new(0) }
    }

    fn push(&mut self, byte: u8) {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) & (QUEUE_SIZE - 1);
        if next == self.tail.load(Ordering::Acquire) {
            return;
        }
        self.buf[head] = byte;
        self.head.store(next, Ordering::Release);
    }

    fn pop(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        let byte = self.buf[tail];
        self.tail.store((tail + 1) & (QUEUE_SIZE - 1), Ordering::Release);
        Some(byte)
    }
}

static QUEUE: Mutex<ByteQueue> = Mutex::new(ByteQueue::new());
static DECODER: Mutex<Option<Keyboard<layouts::Us104Key, ScancodeSet1>>> = Mutex::new(None);

fn update_modifier(bit: u8, down: bool) {
    if down {
        MODIFIER_STATE.fetch_or(bit, Ordering::Relaxed);
    } else {
        MODIFIER_STATE.fetch_and(!bit, Ordering::Relaxed);
    }
}

fn handle_byte(scancode: u8) {
    let mut decoder = DECODER.lock();
    let Some(kb) = decoder.as_mut() else { return };
    let Ok(Some(key_event)) = kb.add_byte(scancode) else { return };

    let is_down = key_event.state == KeyState::Down;
    match key_event.code {
        KeyCode::LShift | KeyCode::RShift => update_modifier(MOD_SHIFT, is_down),
        KeyCode::LControl | KeyCode::RControl => update_modifier(MOD_CTRL, is_down),
        KeyCode::LAlt | KeyCode::RAltGr => update_modifier(MOD_ALT, is_down),
        KeyCode::LWin | KeyCode::RWin => update_modifier(MOD_SUPER, is_down),
        _ => {}
    }

    if let Some(keysym) = kb.process_keyevent(key_event) {
        publish(KeyEvent { keysym, mod_state: MODIFIER_STATE.load(Ordering::Relaxed) });
    }
}

/// Default subscriber: turns `Unicode` events into queued ASCII bytes for
/// [`pop`]. Arrow/navigation keys become a minimal ANSI escape sequence.
fn queue_subscriber(event: KeyEvent) {
    let mut q = QUEUE.lock();
    match event.keysym {
        DecodedKey::Unicode(ch) if ch.is_ascii() => q.push(ch as u8),
        DecodedKey::Unicode(_) => {}
        DecodedKey::RawKey(key) => {
            let seq: &[u8] = match key {
                KeyCode::ArrowUp => b"\x1b[A",
                KeyCode::ArrowDown => b"\x1b[B",
                KeyCode::ArrowRight => b"\x1b[C",
                KeyCode::ArrowLeft => b"\x1b[D",
                KeyCode::Home => b"\x1b[H",
                KeyCode::End => b"\x1b[F",
                KeyCode::Delete => b"\x1b[3~",
                _ => b"",
            };
            for &b in seq {
                q.push(b);
            }
        }
    }
}

/// Pops one queued ASCII byte, non-blocking.
pub fn pop() -> Option<u8> {
    QUEUE.lock().pop()
}

pub fn init() {
    *DECODER.lock() = Some(Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::MapLettersToUnicode));
    subscribe(queue_subscriber);
    ps2::set_callback(handle_byte);
    ps2::enable();
    println!("[KEYBOARD] ps/2 keyboard ready");
}
