//! Timer identities and the trickle timer governing DIO transmissions.
//!
//! The engine never sleeps itself. It asks the host to schedule a [`TimerId`], and the host calls
//! back into the engine when the timer expires. Scheduling an already pending timer replaces it.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;

/// Interval of the periodic housekeeping timer.
pub const PERIODIC_INTERVAL: Duration = Duration::from_secs(1);

/// Identity of a timer the engine asks its host to run. Per instance timers carry the instance
/// id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TimerId {
    /// Trickle timer for multicast DIOs.
    Dio(u8),
    /// Delayed DAO transmission.
    Dao(u8),
    /// Periodic DAO refresh, ahead of the route lifetime.
    DaoLifetime(u8),
    /// Link probing.
    Probing(u8),
    /// Delayed unicast DIO, in response to a unicast DIS.
    UnicastDio(u8),
    /// Housekeeping, every [`PERIODIC_INTERVAL`].
    Periodic,
    /// Halving of the link statistics freshness.
    LinkStatsDecay,
}

/// What happened when the trickle timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fired {
    /// A DIO must be transmitted now.
    Transmit,
    /// The DIO was suppressed, enough consistent DIOs were heard.
    Suppress,
    /// A new interval started.
    NewInterval,
}

/// Trickle timer state of an instance. Intervals are powers of 2 milliseconds.
#[derive(Debug, Clone)]
pub struct Trickle {
    interval_min: u8,
    doublings: u8,
    redundancy: u8,
    current: u8,
    counter: u8,
    send: bool,
    next_delay: Duration,
}

impl Trickle {
    /// Create a trickle timer at its largest interval, so the first reset takes effect.
    pub fn new(interval_min: u8, doublings: u8, redundancy: u8) -> Self {
        Self {
            interval_min,
            doublings,
            redundancy,
            current: interval_min.saturating_add(doublings),
            counter: 0,
            send: false,
            next_delay: Duration::ZERO,
        }
    }

    /// Replace the parameters, as advertised by a new DAG or version. The current interval is set
    /// to the largest one.
    pub fn reconfigure(&mut self, interval_min: u8, doublings: u8, redundancy: u8) {
        *self = Self {
            counter: self.counter,
            ..Self::new(interval_min, doublings, redundancy)
        };
    }

    pub fn interval_min(&self) -> u8 {
        self.interval_min
    }

    pub fn doublings(&self) -> u8 {
        self.doublings
    }

    pub fn redundancy(&self) -> u8 {
        self.redundancy
    }

    /// Exponent of the current interval.
    pub fn current(&self) -> u8 {
        self.current
    }

    /// Consistent DIOs heard in the current interval.
    pub fn counter(&self) -> u8 {
        self.counter
    }

    /// Length of the current interval.
    pub fn interval(&self) -> Duration {
        interval_of(self.current)
    }

    /// Length of the largest interval.
    pub fn max_interval(&self) -> Duration {
        interval_of(self.interval_min.saturating_add(self.doublings))
    }

    /// Record a consistent DIO.
    pub fn hear_consistent(&mut self) {
        self.counter = self.counter.saturating_add(1);
    }

    /// Restart at the minimum interval. Returns the delay to schedule, or `None` if the timer
    /// already runs at the minimum interval.
    pub fn reset<R: Rng>(&mut self, rng: &mut R) -> Option<Duration> {
        if self.current <= self.interval_min {
            return None;
        }
        Some(self.restart(rng))
    }

    /// Restart at the minimum interval, even if already running at it. Returns the delay to
    /// schedule.
    pub fn restart<R: Rng>(&mut self, rng: &mut R) -> Duration {
        self.current = self.interval_min;
        self.new_interval(rng)
    }

    /// Start a new interval of the current length. Returns the delay until the transmission
    /// point, picked uniformly in the second half of the interval.
    pub fn new_interval<R: Rng>(&mut self, rng: &mut R) -> Duration {
        let interval = self.interval();
        let half = interval / 2;
        let t = half + Duration::from_millis(rng.random_range(0..=half.as_millis() as u64));
        self.next_delay = interval.saturating_sub(t);
        self.send = true;
        self.counter = 0;
        t
    }

    /// Handle expiry of the timer. Returns the outcome and the delay to schedule next.
    pub fn fire<R: Rng>(&mut self, rng: &mut R) -> (Fired, Duration) {
        if self.send {
            let fired = if self.redundancy == 0 || self.counter < self.redundancy {
                Fired::Transmit
            } else {
                Fired::Suppress
            };
            self.send = false;
            (fired, self.next_delay)
        } else {
            if self.current < self.interval_min.saturating_add(self.doublings) {
                self.current += 1;
            }
            (Fired::NewInterval, self.new_interval(rng))
        }
    }
}

fn interval_of(exponent: u8) -> Duration {
    Duration::from_millis(1u64 << exponent.min(40))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::{rngs::StdRng, SeedableRng};

    use super::{Fired, Trickle};

    #[test]
    fn transmission_point_in_second_half() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut trickle = Trickle::new(12, 8, 10);
        let t = trickle.reset(&mut rng).unwrap();
        assert_eq!(trickle.interval(), Duration::from_millis(4096));
        assert!(t >= Duration::from_millis(2048));
        assert!(t <= Duration::from_millis(4096));

        let (fired, next) = trickle.fire(&mut rng);
        assert_eq!(fired, Fired::Transmit);
        assert_eq!(t + next, Duration::from_millis(4096));
    }

    #[test]
    fn interval_doubles_up_to_max() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut trickle = Trickle::new(4, 2, 0);
        trickle.reset(&mut rng);
        for expected in [5, 6, 6] {
            assert_eq!(trickle.fire(&mut rng).0, Fired::Transmit);
            assert_eq!(trickle.fire(&mut rng).0, Fired::NewInterval);
            assert_eq!(trickle.current(), expected);
        }
    }

    #[test]
    fn redundancy_suppresses() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut trickle = Trickle::new(4, 2, 2);
        trickle.reset(&mut rng);
        trickle.hear_consistent();
        trickle.hear_consistent();
        assert_eq!(trickle.fire(&mut rng).0, Fired::Suppress);
        // The counter restarts with the next interval.
        trickle.fire(&mut rng);
        assert_eq!(trickle.counter(), 0);
        assert_eq!(trickle.fire(&mut rng).0, Fired::Transmit);
    }

    #[test]
    fn reset_at_minimum_is_noop() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut trickle = Trickle::new(4, 2, 0);
        assert!(trickle.reset(&mut rng).is_some());
        assert!(trickle.reset(&mut rng).is_none());
    }

    #[test]
    fn restart_without_doublings() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut trickle = Trickle::new(4, 0, 0);
        assert!(trickle.reset(&mut rng).is_none());
        let t = trickle.restart(&mut rng);
        assert!(t >= Duration::from_millis(8) && t <= Duration::from_millis(16));
        assert_eq!(trickle.fire(&mut rng).0, Fired::Transmit);
    }
}
