//! Software timer wheel driven by the PIT.
//!
//! A fixed table of slots, each either empty or holding a oneshot/interval
//! timer. The tick handler (registered on IRQ 0) advances the monotonic
//! system-time counter by [`RESOLUTION_MS`] and walks the table under
//! [`spin::Mutex::try_lock`]: a concurrent syscall holding the lock is not
//! blocked on, matching the non-preemptive concurrency model.

use spin::Mutex;

use crate::arch::x86;
use crate::irq;

/// Milliseconds between timer IRQs. Valid PIT range is 1-50.
const RESOLUTION_MS: u64 = 50;
const TIMER_IRQ: u8 = 0;
const N_TIMERS: usize = 16;
const PIT_FREQ_HZ: u32 = 1_193_182;
const PIT_CHANNEL0_DATA: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_CHANNEL0_SELECT: u8 = 0 << 6;
const PIT_ACCESS_LOHI: u8 = 3 << 4;
const PIT_MODE3_SQUARE_WAVE: u8 = 3 << 1;

/// Distinguishes a timer that reloads itself from one that fires once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerType {
    Oneshot,
    Interval,
}

pub type TimerCallback = fn(usize);

/// Dense handle into the timer table, allocated from a monotonically
/// increasing counter rather than a raw table index, so a stale handle
/// from a cleared slot never aliases a later timer.
pub type TimerHandle = i64;
pub const TIMER_HANDLE_NULL: TimerHandle = -1;

#[derive(Clone, Copy)]
struct Timer {
    handle: TimerHandle,
    kind: TimerType,
    duration_ms: u64,
    start_ms: u64,
    callback: TimerCallback,
    ctx: usize,
}

struct TimerTable {
    slots: [Option<Timer>; N_TIMERS],
    next_handle: TimerHandle,
}

impl TimerTable {
    const fn new() -> Self {
        Self {
            slots: [None; N_TIMERS],
            next_handle: 0,
        }
    }

    fn find(&mut self, handle: TimerHandle) -> Option<&mut Timer> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|t| t.handle == handle)
    }
}

static SYSTEM_TIME_MS: Mutex<u64> = Mutex::new(0);
static LOCAL_TIME_OFFSET_S: Mutex<i64> = Mutex::new(0);
static TIMERS: Mutex<TimerTable> = Mutex::new(TimerTable::new());

/// Programs PIT channel 0 for a [`RESOLUTION_MS`] period and registers the
/// tick handler on IRQ 0.
pub fn init() {
    let reload = (PIT_FREQ_HZ as u64 * RESOLUTION_MS / 1000) as u16;
    // SAFETY: standard PIT channel 0 mode-3 programming sequence, run once
    // during boot before the IRQ is unmasked.
    unsafe {
        x86::outb(PIT_COMMAND, PIT_CHANNEL0_SELECT | PIT_ACCESS_LOHI | PIT_MODE3_SQUARE_WAVE);
        x86::outb(PIT_CHANNEL0_DATA, (reload & 0xFF) as u8);
        x86::outb(PIT_CHANNEL0_DATA, (reload >> 8) as u8);
    }

    irq::register_irq(TIMER_IRQ, handle_timer_irq);
    println!("[TIMER] PIT programmed for {RESOLUTION_MS}ms resolution");
}

fn handle_timer_irq() {
    let now = {
        let mut t = SYSTEM_TIME_MS.lock();
        *t += RESOLUTION_MS;
        *t
    };
    process_timers(now);
}

/// Fires and reloads/clears every timer whose duration has elapsed.
/// Uses `try_lock` so a syscall path holding [`TIMERS`] is never blocked on
/// from interrupt context; the next tick catches up.
fn process_timers(now_ms: u64) {
    let Some(mut table) = TIMERS.try_lock() else {
        return;
    };
    for slot in table.slots.iter_mut() {
        let Some(timer) = slot else { continue };
        if now_ms.wrapping_sub(timer.start_ms) < timer.duration_ms {
            continue;
        }
        (timer.callback)(timer.ctx);
        match timer.kind {
            TimerType::Oneshot => *slot = None,
            TimerType::Interval => {
                if let Some(timer) = slot {
                    timer.start_ms = now_ms;
                }
            }
        }
    }
}

/// System-time milliseconds elapsed since boot, monotonic.
pub fn get_system_ms() -> u64 {
    *SYSTEM_TIME_MS.lock()
}

/// Local ("wall") time, seconds, offset from system time by [`set_local`].
pub fn get_local_s() -> i64 {
    (get_system_ms() / 1000) as i64 + *LOCAL_TIME_OFFSET_S.lock()
}

/// Sets the local-time offset so that [`get_local_s`] returns `seconds` now.
pub fn set_local(seconds: i64) {
    *LOCAL_TIME_OFFSET_S.lock() = seconds - (get_system_ms() / 1000) as i64;
}

/// Busy-waits, spinning on [`x86::idle`]'s `hlt`-free pause equivalent,
/// until `ms` milliseconds of system time have elapsed.
pub fn delay_ms(ms: u32) {
    let start = get_system_ms();
    while get_system_ms().wrapping_sub(start) < ms as u64 {
        core::hint::spin_loop();
    }
}

/// Registers a new timer. Returns [`TIMER_HANDLE_NULL`] if the table is
/// full.
pub fn set(duration_ms: u64, kind: TimerType, callback: TimerCallback, ctx: usize) -> TimerHandle {
    let mut table = TIMERS.lock();
    let Some(pos) = table.slots.iter().position(|s| s.is_none()) else {
        return TIMER_HANDLE_NULL;
    };
    let handle = table.next_handle;
    table.next_handle += 1;
    let now = get_system_ms();
    table.slots[pos] = Some(Timer {
        handle,
        kind,
        duration_ms,
        start_ms: now,
        callback,
        ctx,
    });
    handle
}

/// Clears a timer if it is set; a no-op otherwise, including for a handle
/// whose callback just fired concurrently with the clear.
pub fn clear(handle: TimerHandle) {
    let mut table = TIMERS.lock();
    if let Some(pos) = table.slots.iter().position(|s| matches!(s, Some(t) if t.handle == handle)) {
        table.slots[pos] = None;
    }
}

/// Restarts `handle` with a new duration, from now. Returns `false` if the
/// timer no longer exists.
pub fn reset(handle: TimerHandle, new_duration_ms: u64) -> bool {
    let mut table = TIMERS.lock();
    let now = get_system_ms();
    match table.find(handle) {
        Some(timer) => {
            timer.duration_ms = new_duration_ms;
            timer.start_ms = now;
            true
        }
        None => false,
    }
}

pub fn is_active(handle: TimerHandle) -> bool {
    TIMERS.lock().find(handle).is_some()
}
