//! VGA console: cursor-tracked text output with a small ANSI subset, plus
//! line-edited and single-character input pulled from the keyboard
//! subsystem's decoded-byte queue.

use core::fmt;

use spin::Mutex;

use super::{keyboard, vga};
use vga::Color;

/// Escape-sequence accumulator. Only the handful of sequences the
/// bootstrap banner and shell actually emit are recognized; anything else
/// is swallowed silently up to its terminator.
#[derive(Clone, Copy, PartialEq, Eq)]
enum AnsiState {
    Ground,
    Esc,
    Bracket,
    Param(u8),
}

struct ConsoleState {
    row: usize,
    col: usize,
    fg: Color,
    bg: Color,
    ansi: AnsiState,
}

impl ConsoleState {
    const fn new() -> Self {
        Self { row: 0, col: 0, fg: Color::LightGray, bg: Color::Black, ansi: AnsiState::Ground }
    }

    fn newline(&mut self) {
        self.col = 0;
        if self.row + 1 < vga::HEIGHT {
            self.row += 1;
        } else {
            vga::scroll(self.bg);
        }
    }

    fn put(&mut self, byte: u8) {
        if self.col >= vga::WIDTH {
            self.newline();
        }
        vga::put_glyph(self.row, self.col, byte, self.fg, self.bg);
        self.col += 1;
    }

    fn home(&mut self) {
        self.row = 0;
        self.col = 0;
    }

    /// Applies one raw byte through the ANSI state machine, returning
    /// whether it produced visible output (vs. being consumed as part of
    /// an escape sequence).
    fn feed(&mut self, byte: u8) {
        match self.ansi {
            AnsiState::Ground => match byte {
                0x1b => self.ansi = AnsiState::Esc,
                b'\n' => self.newline(),
                b'\r' => self.col = 0,
                0x08 => {
                    if self.col > 0 {
                        self.col -= 1;
                        vga::put_glyph(self.row, self.col, b' ', self.fg, self.bg);
                    }
                }
                _ => self.put(byte),
            },
            AnsiState::Esc => {
                self.ansi = if byte == b'[' { AnsiState::Bracket } else { AnsiState::Ground };
            }
            AnsiState::Bracket => match byte {
                b'H' => {
                    self.home();
                    self.ansi = AnsiState::Ground;
                }
                b'J' => {
                    vga::clear(self.bg);
                    self.home();
                    self.ansi = AnsiState::Ground;
                }
                b'0'..=b'9' => self.ansi = AnsiState::Param(byte - b'0'),
                _ => self.ansi = AnsiState::Ground,
            },
            AnsiState::Param(n) => match byte {
                b'0'..=b'9' => self.ansi = AnsiState::Param(n.saturating_mul(10).saturating_add(byte - b'0')),
                b'm' => {
                    self.apply_sgr(n);
                    self.ansi = AnsiState::Ground;
                }
                b'J' => {
                    if n == 2 {
                        vga::clear(self.bg);
                        self.home();
                    }
                    self.ansi = AnsiState::Ground;
                }
                _ => self.ansi = AnsiState::Ground,
            },
        }
    }

    fn apply_sgr(&mut self, code: u8) {
        match code {
            0 => {
                self.fg = Color::LightGray;
                self.bg = Color::Black;
            }
            30..=37 => self.fg = Color::from_ansi(code - 30),
            40..=47 => self.bg = Color::from_ansi(code - 40),
            _ => {}
        }
    }
}

static STATE: Mutex<ConsoleState> = Mutex::new(ConsoleState::new());

pub fn init() {
    vga::clear(Color::Black);
    vga::disable_cursor();
    println!("[CONSOLE] vga console ready");
}

/// Writes `bytes` through the ANSI state machine.
pub fn write(bytes: &[u8]) {
    let mut s = STATE.lock();
    for &b in bytes {
        s.feed(b);
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    struct Sink;
    impl fmt::Write for Sink {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            write(s.as_bytes());
            Ok(())
        }
    }
    let _ = Sink.write_fmt(args);
}

/// Blocks until a decoded key byte is available.
pub fn getchar() -> u8 {
    loop {
        if let Some(b) = keyboard::pop() {
            return b;
        }
        core::hint::spin_loop();
    }
}

const BACKSPACE: u8 = 0x08;
const ENTER: u8 = b'\n';

/// Reads one line into `buf`, echoing each byte and honoring backspace.
/// Stops at `\n` (not copied) or when `buf` fills. Returns the byte count.
pub fn readline(buf: &mut [u8]) -> usize {
    let mut n = 0usize;
    loop {
        let b = getchar();
        match b {
            ENTER | b'\r' => {
                write(b"\n");
                return n;
            }
            BACKSPACE | 0x7f => {
                if n > 0 {
                    n -= 1;
                    write(&[BACKSPACE]);
                }
            }
            _ => {
                if n < buf.len() {
                    buf[n] = b;
                    n += 1;
                    write(&[b]);
                }
            }
        }
    }
}
