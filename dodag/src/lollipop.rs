//! Dedicated logic for
//! [lollipop counters](https://datatracker.ietf.org/doc/html/rfc6550#section-7.2), used for DAG
//! versions, DTSN and DAO sequence numbers.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Largest value a lollipop counter can hold.
const MAX_VALUE: u8 = 255;
/// Values up to and including this one form the circular region of the counter.
const CIRCULAR_REGION: u8 = 127;
/// Maximum distance between two comparable values.
const SEQUENCE_WINDOW: u8 = 16;
/// Value a counter starts at, located in the linear region so a restart is detectable.
const INIT: u8 = MAX_VALUE - SEQUENCE_WINDOW + 1;

/// A wrapping counter with a linear "start" region above the circular region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lollipop(u8);

impl Lollipop {
    /// Create a new `Lollipop` counter at the initial value.
    pub const fn new() -> Self {
        Lollipop(INIT)
    }

    /// Advance the counter by one. Values in the linear region count up to the maximum and then
    /// enter the circular region, which wraps on itself.
    pub fn increment(&mut self) {
        self.0 = if self.0 > CIRCULAR_REGION {
            self.0.wrapping_add(1)
        } else {
            (self.0 + 1) & CIRCULAR_REGION
        };
    }

    /// Returns a copy of this counter, incremented by one.
    pub fn next(self) -> Self {
        let mut next = self;
        next.increment();
        next
    }

    /// Checks if this counter is the initial value.
    pub const fn is_initial(&self) -> bool {
        self.0 == INIT
    }

    /// Custom greater-than comparison as defined for lollipop counters. Note that we don't
    /// implement [`PartialOrd`](std::cmp::PartialOrd), as this comparison is not transitive.
    ///
    /// A value in the linear region compares greater than a value in the circular region only if
    /// the circular value is not within the sequence window of the wrap point, otherwise the
    /// circular value is the greater one.
    pub fn gt(&self, other: &Self) -> bool {
        let (a, b) = (self.0 as u16, other.0 as u16);
        match (self.0 > CIRCULAR_REGION, other.0 > CIRCULAR_REGION) {
            (true, false) => return linear_beats_circular(a, b),
            (false, true) => return !linear_beats_circular(b, a),
            _ => {}
        }
        (a > b && (a - b) < SEQUENCE_WINDOW as u16)
            || (a < b && (b - a) > (CIRCULAR_REGION as u16 + 1 - SEQUENCE_WINDOW as u16))
    }
}

/// Whether `linear`, a value in the linear region, is newer than `circular`.
fn linear_beats_circular(linear: u16, circular: u16) -> bool {
    (MAX_VALUE as u16 + 1 + circular - linear) > SEQUENCE_WINDOW as u16
}

impl Default for Lollipop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Lollipop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}", self.0))
    }
}

impl From<u8> for Lollipop {
    fn from(value: u8) -> Self {
        Lollipop(value)
    }
}

impl From<Lollipop> for u8 {
    fn from(value: Lollipop) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::Lollipop;

    #[test]
    fn starts_in_linear_region() {
        let l = Lollipop::new();
        assert_eq!(u8::from(l), 240);
        assert!(l.is_initial());
    }

    #[test]
    fn increment_wraps_into_circular_region() {
        let mut l = Lollipop::from(255);
        l.increment();
        assert_eq!(u8::from(l), 0);

        let mut l = Lollipop::from(127);
        l.increment();
        assert_eq!(u8::from(l), 0);

        let mut l = Lollipop::from(240);
        l.increment();
        assert_eq!(u8::from(l), 241);
    }

    #[test]
    fn cmp_small_increase() {
        let a = Lollipop::from(10);
        let b = Lollipop::from(11);
        assert!(b.gt(&a));
        assert!(!a.gt(&b));
        assert!(!a.gt(&a));
    }

    #[test]
    fn cmp_wrapped_circular_region() {
        // 2 follows 126 after wrapping through 127.
        let a = Lollipop::from(126);
        let b = Lollipop::from(2);
        assert!(b.gt(&a));
        assert!(!a.gt(&b));
    }

    #[test]
    fn cmp_linear_against_circular() {
        // A restarted counter is newer than an old circular value far from the wrap point.
        let init = Lollipop::new();
        assert!(init.gt(&Lollipop::from(20)));
        assert!(!Lollipop::from(20).gt(&init));

        // But not newer than a circular value that just wrapped from the end of the linear
        // region.
        let late = Lollipop::from(250);
        assert!(!late.gt(&Lollipop::from(3)));
        assert!(Lollipop::from(3).gt(&late));
    }

    #[test]
    fn circular_against_linear_takes_the_linear_answer() {
        // 240 is a restart, newer than 5 which is far from the wrap point.
        assert!(Lollipop::from(240).gt(&Lollipop::from(5)));
        assert!(!Lollipop::from(5).gt(&Lollipop::from(240)));
    }

    #[test]
    fn cmp_never_both_greater() {
        for a in 0..=255u8 {
            for b in 0..=255u8 {
                let (la, lb) = (Lollipop::from(a), Lollipop::from(b));
                if a == b {
                    assert!(!la.gt(&lb));
                } else if la.gt(&lb) {
                    assert!(!lb.gt(&la), "{a} and {b} both compare greater");
                }
            }
        }
    }
}
