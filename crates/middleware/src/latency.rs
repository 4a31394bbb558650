//! Low-latency timing: TSC clock reads without syscalls on the hot path.

use once_cell::sync::Lazy;
use quanta::Clock;
use std::time::Duration;

/// Global TSC clock - zero syscall timestamp reads
pub static CLOCK: Lazy<Clock> = Lazy::new(Clock::new);

/// Get current TSC timestamp (zero syscalls)
#[inline]
pub fn now_tsc() -> u64 {
    CLOCK.raw()
}

/// Wall duration between two raw TSC readings
#[inline]
pub fn elapsed_since(start: u64) -> Duration {
    CLOCK.delta(start, now_tsc())
}
