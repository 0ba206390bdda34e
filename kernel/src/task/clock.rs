//! Monotonic kernel clock.
//!
//! Time is measured from a boot epoch that is latched the first time anyone
//! reads the clock. A [`Timestamp`] is an absolute point on that timeline;
//! timer deadlines and condvar wait bounds are expressed in it.

use core::time::Duration;
use std::time::Instant;

use spin::Once;

static EPOCH: Once<Instant> = Once::new();

fn epoch() -> Instant {
    *EPOCH.call_once(Instant::now)
}

/// Absolute monotonic time since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// The boot instant. Every deadline at or before it is already due.
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    pub fn now() -> Self {
        Timestamp(epoch().elapsed())
    }

    /// `now() + delay`.
    pub fn after(delay: Duration) -> Self {
        Self::now().saturating_add(delay)
    }

    pub const fn from_duration(since_boot: Duration) -> Self {
        Timestamp(since_boot)
    }

    pub const fn as_duration(self) -> Duration {
        self.0
    }

    pub fn saturating_add(self, delta: Duration) -> Self {
        Timestamp(self.0.saturating_add(delta))
    }

    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    /// Nanoseconds since boot, clamped to `u64`.
    pub fn as_nanos(self) -> u64 {
        u64::try_from(self.0.as_nanos()).unwrap_or(u64::MAX)
    }

    pub const fn from_nanos(nanos: u64) -> Self {
        Timestamp(Duration::from_nanos(nanos))
    }

    /// The host instant for this timestamp, for condvar deadlines. Points too
    /// far in the future to represent become "a year from now", which every
    /// caller treats as "no deadline".
    pub fn to_instant(self) -> Instant {
        epoch()
            .checked_add(self.0)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(365 * 24 * 3600))
    }
}

/// Current monotonic time.
#[inline]
pub fn now() -> Timestamp {
    Timestamp::now()
}

/// The first point `deadline + k * interval` (k >= 1) strictly after `now`.
///
/// Ticks that were missed while a repeating timer was late are skipped,
/// never replayed. A zero interval returns `deadline` unchanged.
pub fn advance_past(deadline: Timestamp, interval: Duration, now: Timestamp) -> Timestamp {
    let step = interval.as_nanos();
    if step == 0 {
        return deadline;
    }
    let base = deadline.0.as_nanos();
    let target = now.0.as_nanos();
    let ticks = if target < base {
        1
    } else {
        (target - base) / step + 1
    };
    let next = base.saturating_add(ticks.saturating_mul(step));
    let next = u64::try_from(next).unwrap_or(u64::MAX);
    Timestamp::from_nanos(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(v))
    }

    #[test]
    fn on_time_timer_moves_one_interval() {
        let next = advance_past(ms(100), Duration::from_millis(100), ms(120));
        assert_eq!(next, ms(200));
    }

    #[test]
    fn missed_ticks_are_skipped() {
        let interval = Duration::from_millis(100);
        assert_eq!(advance_past(ms(100), interval, ms(350)), ms(400));
        // Landing exactly on a tick is not "strictly after".
        assert_eq!(advance_past(ms(100), interval, ms(400)), ms(500));
    }

    #[test]
    fn early_rearm_still_advances() {
        let next = advance_past(ms(500), Duration::from_millis(10), ms(100));
        assert_eq!(next, ms(510));
    }

    #[test]
    fn clock_is_monotonic() {
        let a = now();
        let b = now();
        assert!(b >= a);
        assert!(Timestamp::after(Duration::from_millis(5)) > a);
        assert!(Timestamp::ZERO <= a);
    }

    #[test]
    fn instants_round_trip_through_the_epoch() {
        let t = Timestamp::after(Duration::from_millis(50));
        assert!(t.to_instant() > Instant::now());
        assert_eq!(Timestamp::from_nanos(t.as_nanos()), t);
    }
}
