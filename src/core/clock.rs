//! Wrap-Safe Timekeeping
//!
//! Every node runs a free-running 32-bit microsecond counter that wraps
//! roughly every 71 minutes. All arithmetic on these counters is modular:
//! differences are taken with `wrapping_sub` and only then interpreted,
//! so nothing corrupts when a counter rolls over.
//!
//! Timers are plain values (`IntervalTimer`) polled once per loop
//! iteration instead of scheduled callbacks.

use std::time::Instant;
use serde::{Serialize, Deserialize};

/// Microseconds per millisecond.
pub const MICROS_PER_MILLI: u32 = 1_000;

/// A reading of a node's local 32-bit microsecond counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u32);

impl Timestamp {
    /// Counter value zero.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Create from a raw microsecond counter value.
    #[inline]
    pub const fn from_micros(us: u32) -> Self {
        Self(us)
    }

    /// Create from milliseconds (wraps like the hardware counter).
    #[inline]
    pub const fn from_millis(ms: u32) -> Self {
        Self(ms.wrapping_mul(MICROS_PER_MILLI))
    }

    /// Raw counter value.
    #[inline]
    pub const fn micros(self) -> u32 {
        self.0
    }

    /// Advance by `us` microseconds, wrapping.
    #[inline]
    pub const fn add_micros(self, us: u32) -> Self {
        Self(self.0.wrapping_add(us))
    }

    /// Advance by `ms` milliseconds, wrapping.
    #[inline]
    pub const fn add_millis(self, ms: u32) -> Self {
        self.add_micros(ms.wrapping_mul(MICROS_PER_MILLI))
    }

    /// Microseconds elapsed since `earlier`.
    ///
    /// Correct across a single wraparound as long as the true interval is
    /// below 2^32 µs.
    #[inline]
    pub const fn elapsed_since(self, earlier: Timestamp) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Milliseconds elapsed since `earlier`.
    #[inline]
    pub const fn millis_since(self, earlier: Timestamp) -> u32 {
        self.elapsed_since(earlier) / MICROS_PER_MILLI
    }

    /// Signed distance `self - other`, taking the shorter way round the
    /// counter circle.
    #[inline]
    pub const fn signed_diff(self, other: Timestamp) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }

    /// Shift by a signed offset in microseconds, wrapping.
    ///
    /// Offsets are only meaningful modulo 2^32, so the high bits of `offset`
    /// are discarded.
    #[inline]
    pub const fn offset_by(self, offset: i64) -> Self {
        Self(self.0.wrapping_add(offset as u32))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Source of local time.
pub trait Clock {
    /// Current counter value.
    fn now(&self) -> Timestamp;
}

/// Host-process clock: microseconds since construction, truncated to 32
/// bits so it wraps exactly like the firmware counter.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Start counting from now.
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed().as_micros() as u32)
    }
}

/// A periodic timer expressed as `{ last_fired_at, interval }`.
///
/// Fires on the first poll, then whenever at least `interval` has elapsed
/// since the last firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalTimer {
    last_fired_at: Option<Timestamp>,
    interval_us: u32,
}

impl IntervalTimer {
    /// Timer with the given period in milliseconds.
    pub const fn from_millis(interval_ms: u32) -> Self {
        Self {
            last_fired_at: None,
            interval_us: interval_ms.saturating_mul(MICROS_PER_MILLI),
        }
    }

    /// Timer that does not fire until one full interval after `now`.
    pub const fn started_at(interval_ms: u32, now: Timestamp) -> Self {
        Self {
            last_fired_at: Some(now),
            interval_us: interval_ms.saturating_mul(MICROS_PER_MILLI),
        }
    }

    /// Period in microseconds.
    pub const fn interval_us(&self) -> u32 {
        self.interval_us
    }

    /// When the timer last fired.
    pub const fn last_fired_at(&self) -> Option<Timestamp> {
        self.last_fired_at
    }

    /// Whether the timer is due at `now`, without consuming it.
    pub fn is_due(&self, now: Timestamp) -> bool {
        match self.last_fired_at {
            None => true,
            Some(last) => now.elapsed_since(last) >= self.interval_us,
        }
    }

    /// Fire if due. Returns `true` when the caller should act.
    pub fn poll(&mut self, now: Timestamp) -> bool {
        if self.is_due(now) {
            self.last_fired_at = Some(now);
            true
        } else {
            false
        }
    }

    /// Restart the period from `now`.
    pub fn restart(&mut self, now: Timestamp) {
        self.last_fired_at = Some(now);
    }

    /// Forget the last firing so the next poll fires immediately.
    pub fn clear(&mut self) {
        self.last_fired_at = None;
    }
}

/// A one-shot deadline, armed and polled like `IntervalTimer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    armed_at: Option<Timestamp>,
    after_us: u32,
}

impl Deadline {
    /// Arm to expire `after_ms` after `now`.
    pub fn arm(&mut self, now: Timestamp, after_ms: u32) {
        self.armed_at = Some(now);
        self.after_us = after_ms.saturating_mul(MICROS_PER_MILLI);
    }

    /// Disarm without firing.
    pub fn cancel(&mut self) {
        self.armed_at = None;
    }

    /// Whether a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    /// Returns `true` once when the deadline passes, then disarms.
    pub fn expired(&mut self, now: Timestamp) -> bool {
        match self.armed_at {
            Some(at) if now.elapsed_since(at) >= self.after_us => {
                self.armed_at = None;
                true
            }
            _ => false,
        }
    }
}
