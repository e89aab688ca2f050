//! System tick and hardware tick keeping (§4.3).
//!
//! Grounded on `original_source/rtos/kernel/kernel.c`/`kernel.h`
//! (`current_tick`, `current_system_tick`, the `MS_TO_TICK`/`TICK_TO_MS`/
//! `US_TO_HW_TICK` macros) for the exact semantics, and on
//! `r3_kernel::timeout`'s role as the module owning the tick source for the
//! Rust shape (a single counter behind the CPU lock, advanced by a port
//! timer callback).
use crate::intr_lock::{self, IntrLockCell};
use crate::port;

static SYSTEM_TICK: IntrLockCell<u32> = IntrLockCell::new(0);

/// Advances the soft tick counter by one. Called by the installed [`Port`]'s
/// timer interrupt handler; never called by task code.
pub fn advance_system_tick() {
    let mut guard = intr_lock::lock();
    let tick = SYSTEM_TICK.write(&mut *guard);
    *tick = tick.wrapping_add(1);
}

/// Returns the number of soft ticks elapsed since [`crate::kernel_run`].
///
/// Matches `current_system_tick`: reads the counter inside a critical
/// section, since it is written non-atomically by the port timer ISR on
/// targets without a native atomic 32-bit read.
pub fn current_system_tick() -> u32 {
    let guard = intr_lock::lock();
    *SYSTEM_TICK.read(&*guard)
}

/// Returns a high-resolution, monotonically increasing tick count.
///
/// If the installed port exposes a live sub-tick hardware counter
/// ([`crate::port::Port::hw_timer_counter`]), composes it with the soft tick
/// for extra resolution between soft ticks. Otherwise degrades gracefully to
/// the soft tick alone, so callers (e.g. [`crate::sleep::sleep_us`]) still
/// get a monotonic `u64` even on ports with no free-running timer register.
pub fn current_hardware_tick() -> u64 {
    let port = port::installed();
    let soft = current_system_tick() as u64;
    match port.hw_timer_counter() {
        Some(hw) => soft << 32 | hw as u64,
        None => soft,
    }
}

/// Converts a millisecond duration to a soft tick count, for the installed
/// port's tick rate.
pub fn ms_to_ticks(ms: u32) -> u32 {
    let ticks_per_sec = port::installed().ticks_per_sec() as u64;
    ((ms as u64 * ticks_per_sec) / 1000) as u32
}

/// Converts a soft tick count to milliseconds, for the installed port's tick
/// rate.
pub fn ticks_to_ms(ticks: u32) -> u32 {
    let ticks_per_sec = port::installed().ticks_per_sec() as u64;
    ((ticks as u64 * 1000) / ticks_per_sec) as u32
}

/// `true` if `a` is before `b` in system-tick order, tolerant of `u32`
/// wraparound (modular-signed comparison, matching `INT32CMP` in the
/// original kernel).
pub fn tick_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_before_handles_wraparound() {
        assert!(tick_before(10, 20));
        assert!(!tick_before(20, 10));
        assert!(tick_before(u32::MAX, 0));
        assert!(!tick_before(0, u32::MAX));
    }
}
