//! Timestamp source for logged entries
//!
//! The core captures one `u64` per entry and never interprets it. Hosts with
//! their own time base (cycle counters, PTP-disciplined clocks) install a
//! replacement via [`Context::set_timestamp_fn`](crate::Context::set_timestamp_fn).

/// Signature of a timestamp source. Must be cheap and callable from any
/// producer thread.
pub type TimestampFn = fn() -> u64;

/// Default timestamp source: monotonic wall clock in nanoseconds.
pub fn monotonic_ns() -> u64 {
    use nix::time::{clock_gettime, ClockId};

    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64,
        Err(_) => 0,
    }
}
