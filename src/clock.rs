//! Millisecond timekeeping.
//!
//! The whole pipeline runs off one free-running millisecond counter. A
//! [`Deadline`] is an instant on that counter; comparisons are done with
//! wraparound-safe arithmetic, so the counter may roll over freely. The
//! maximum deadline distance is `u32::MAX / 2` milliseconds (about 600
//! hours) and an expired deadline keeps testing as expired for the same
//! span, so every armed deadline must be polled at least once within it.

use embassy_time::Instant;

/// Upper bound for a deadline distance in milliseconds.
pub const FOREVER: u32 = u32::MAX / 2;

/// An instant on the millisecond counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline(u32);

impl Deadline {
    /// Deadline `msecs` from `now`, saturated at [`FOREVER`].
    pub const fn after(now: u32, msecs: u32) -> Self {
        let msecs = if msecs >= FOREVER { FOREVER } else { msecs };
        Self(now.wrapping_add(msecs))
    }

    /// Whether the deadline has passed.
    ///
    /// Subtracting the current count from the deadline yields the number of
    /// milliseconds until expiration, or an unsigned overflow once it has
    /// passed. The overflown value decreases from `u32::MAX`, so an expired
    /// deadline stays expired for about 600 hours.
    pub const fn expired(self, now: u32) -> bool {
        self.0.wrapping_sub(now) > FOREVER
    }

    /// Milliseconds until expiration, zero once expired.
    pub const fn remaining(self, now: u32) -> u32 {
        let dt = self.0.wrapping_sub(now);
        if dt > FOREVER {
            0
        } else {
            dt
        }
    }
}

/// Source of the millisecond count.
///
/// `delay` is the only legal busy wait in the system; implementations that
/// can yield to other work should do so from [`Clock::idle`].
pub trait Clock {
    /// Current free-running millisecond count.
    fn now(&self) -> u32;

    /// Called once per iteration of every polling wait.
    fn idle(&self) {}

    /// Deadline `msecs` from now.
    fn deadline(&self, msecs: u32) -> Deadline {
        Deadline::after(self.now(), msecs)
    }

    /// Spin until `msecs` have elapsed.
    fn delay(&self, msecs: u32) {
        let deadline = self.deadline(msecs);
        while !deadline.expired(self.now()) {
            self.idle();
        }
    }
}

/// [`Clock`] backed by the system tick.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        Instant::now().as_millis() as u32
    }
}
