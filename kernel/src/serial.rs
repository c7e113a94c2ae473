//! Serial port byte sink.
//!
//! Out of scope per the core's component design: the core only requires a
//! byte sink with ready-to-transmit polling (`write_str`). Backed by
//! `uart_16550` on COM1.

use core::fmt;
use spin::Mutex;
use uart_16550::SerialPort;

static COM1: Mutex<Option<SerialPort>> = Mutex::new(None);

pub fn init() {
    // SAFETY: 0x3F8 is the standard COM1 base port.
    let mut port = unsafe { SerialPort::new(0x3F8) };
    port.init();
    *COM1.lock() = Some(port);
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    if let Some(port) = COM1.lock().as_mut() {
        let _ = port.write_fmt(args);
    }
}
