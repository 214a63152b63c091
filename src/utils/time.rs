//! Monotonic nanosecond time and signed spans.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// A measurement of a monotonically nondecreasing clock, in nanoseconds
/// since an arbitrary epoch.
///
/// The kernel never reads a wall clock on its own; a `Time` is always
/// produced by the time oracle installed at setup, and is snapshotted once
/// per scheduler cycle.
#[derive(Serialize, Deserialize, Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(u64);

impl Time {
    /// The zero point of the monotonic clock.
    #[inline]
    pub fn epoch() -> Time {
        Time(0)
    }

    #[inline]
    pub fn from_nanos(nanos: u64) -> Time {
        Time(nanos)
    }

    #[inline]
    pub fn nanos(self) -> u64 {
        self.0
    }

    /// Span elapsed from `earlier` to `self`.
    #[inline]
    pub fn since(self, earlier: Time) -> Span {
        self - earlier
    }

    /// The smallest of `self` and `rhs`.
    #[inline]
    pub fn min(self, rhs: Time) -> Time {
        if self <= rhs {
            self
        } else {
            rhs
        }
    }

    /// The largest of `self` and `rhs`.
    #[inline]
    pub fn max(self, rhs: Time) -> Time {
        if self >= rhs {
            self
        } else {
            rhs
        }
    }
}

impl Add<Span> for Time {
    type Output = Time;

    fn add(self, rhs: Span) -> Time {
        if rhs.0 < 0 {
            Time(self.0.saturating_sub(rhs.0.wrapping_neg() as u64))
        } else {
            Time(self.0 + rhs.0 as u64)
        }
    }
}

impl Sub<Span> for Time {
    type Output = Time;

    fn sub(self, rhs: Span) -> Time {
        self + (-rhs)
    }
}

impl Sub for Time {
    type Output = Span;

    fn sub(self, rhs: Time) -> Span {
        Span(self.0 as i64 - rhs.0 as i64)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// A signed nanosecond delta between two `Time`s.
#[derive(Serialize, Deserialize, Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span(i64);

impl Span {
    pub const ZERO: Span = Span(0);

    #[inline]
    pub fn from_nanos(nanos: i64) -> Span {
        Span(nanos)
    }

    #[inline]
    pub fn from_micros(micros: i64) -> Span {
        Span(micros * 1_000)
    }

    #[inline]
    pub fn from_millis(millis: i64) -> Span {
        Span(millis * 1_000_000)
    }

    #[inline]
    pub fn from_secs(secs: i64) -> Span {
        Span(secs * 1_000_000_000)
    }

    #[inline]
    pub fn nanos(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Scales the span by a uniformly random factor in
    /// `[1 - percent, 1 + percent]`, which is handy to avoid thundering
    /// herds of periodic work scheduled at the same instant.
    ///
    /// `percent` must be in `[0, 1]`.
    pub fn randomize(self, percent: f64) -> Span {
        use rand::Rng;

        assert!(
            percent >= 0.0 && percent <= 1.0,
            "randomize percent out of [0, 1]: {}",
            percent
        );
        if percent == 0.0 {
            return self;
        }

        let factor = rand::thread_rng().gen_range(1.0 - percent, 1.0 + percent);
        Span((self.0 as f64 * factor) as i64)
    }
}

impl Add for Span {
    type Output = Span;

    fn add(self, rhs: Span) -> Span {
        Span(self.0 + rhs.0)
    }
}

impl AddAssign for Span {
    fn add_assign(&mut self, rhs: Span) {
        self.0 += rhs.0;
    }
}

impl Sub for Span {
    type Output = Span;

    fn sub(self, rhs: Span) -> Span {
        Span(self.0 - rhs.0)
    }
}

impl SubAssign for Span {
    fn sub_assign(&mut self, rhs: Span) {
        self.0 -= rhs.0;
    }
}

impl Mul<i64> for Span {
    type Output = Span;

    fn mul(self, rhs: i64) -> Span {
        Span(self.0 * rhs)
    }
}

impl Div<i64> for Span {
    type Output = Span;

    fn div(self, rhs: i64) -> Span {
        Span(self.0 / rhs)
    }
}

impl Neg for Span {
    type Output = Span;

    fn neg(self) -> Span {
        Span(-self.0)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// A hand-cranked time oracle for tests and simulations. Clones share
/// the same clock.
#[derive(Clone, Default)]
pub struct ManualTimeSource {
    now: ::std::rc::Rc<::std::cell::Cell<Time>>,
}

impl ManualTimeSource {
    pub fn new() -> ManualTimeSource {
        Default::default()
    }

    #[inline]
    pub fn get(&self) -> Time {
        self.now.get()
    }

    /// Moves the clock forward; a manual clock never runs backwards.
    pub fn advance(&self, span: Span) {
        assert!(!span.is_negative(), "manual time cannot move backwards");
        self.now.set(self.now.get() + span);
    }

    pub fn set(&self, to: Time) {
        assert!(to >= self.now.get(), "manual time cannot move backwards");
        self.now.set(to);
    }

    /// The boxed oracle to hand to `setup_with_time_source`.
    pub fn oracle(&self) -> Box<dyn Fn() -> Time> {
        let clock = self.clone();
        Box::new(move || clock.get())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arithmetic() {
        let t = Time::from_nanos(100);
        assert_eq!(t + Span::from_nanos(50), Time::from_nanos(150));
        assert_eq!(t - Span::from_nanos(50), Time::from_nanos(50));
        assert_eq!(Time::from_nanos(150) - t, Span::from_nanos(50));
        assert_eq!(t + Span::from_nanos(-200), Time::epoch());
        assert_eq!(Span::from_millis(1), Span::from_nanos(1_000_000));
    }

    #[test]
    fn randomize_stays_in_bounds() {
        let span = Span::from_millis(100);
        for _ in 0..64 {
            let jittered = span.randomize(0.2).nanos();
            assert!(jittered >= 80_000_000 && jittered <= 120_000_000);
        }
    }
}
