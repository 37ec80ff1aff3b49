//! Conversion between wall-clock durations and kernel ticks.

use core::time::Duration;

/// Kernel time unit.
pub type Ticks = u32;

/// Tick count meaning "block until the condition is met".
pub const MAX_DELAY: Ticks = Ticks::MAX;

/// Duration meaning "block until the condition is met".
pub const FOREVER: Duration = Duration::MAX;

/// Converts `duration` to ticks at `tick_rate_hz`, truncating.
///
/// [`FOREVER`] maps to [`MAX_DELAY`]. Finite durations saturate one tick
/// below it so they never turn into an unbounded wait.
pub fn to_ticks(duration: Duration, tick_rate_hz: u32) -> Ticks {
    if duration == FOREVER {
        return MAX_DELAY;
    }
    let ticks = duration.as_millis() * u128::from(tick_rate_hz) / 1000;
    if ticks >= u128::from(MAX_DELAY) {
        MAX_DELAY - 1
    } else {
        ticks as Ticks
    }
}

/// Converts `ticks` back to a duration at `tick_rate_hz`.
pub fn to_duration(ticks: u64, tick_rate_hz: u32) -> Duration {
    if tick_rate_hz == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(ticks.saturating_mul(1000) / u64::from(tick_rate_hz))
}
