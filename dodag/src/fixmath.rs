//! Signed 16.16 fixed point helpers used by the signal-strength based objective functions.
//!
//! Every operation saturates instead of wrapping or panicking, division by zero included.

use std::time::Duration;

use fixed::types::I16F16;

/// The fixed point representation used for signal strength and its derivatives.
pub type Fix = I16F16;

/// Shortest time span [`seconds`] returns, so derivatives never divide by zero.
const MIN_SECONDS: Fix = Fix::from_bits(0x4000);

/// Convert an integer to [`Fix`], saturating at the representable bounds.
pub fn from_int(value: i32) -> Fix {
    Fix::saturating_from_num(value)
}

/// Convert a float constant to [`Fix`], saturating at the representable bounds.
pub fn from_f32(value: f32) -> Fix {
    Fix::saturating_from_num(value)
}

/// Round to the nearest integer, with ties away from zero.
pub fn to_int(value: Fix) -> i32 {
    value.saturating_round().to_num::<i32>()
}

/// Saturating division. Division by zero saturates toward the sign of the dividend.
pub fn div(lhs: Fix, rhs: Fix) -> Fix {
    match lhs.checked_div(rhs) {
        Some(v) => v,
        None if rhs == Fix::ZERO && lhs < Fix::ZERO => Fix::MIN,
        None if rhs == Fix::ZERO => Fix::MAX,
        // Overflow, the result has the sign of lhs * rhs.
        None if (lhs < Fix::ZERO) != (rhs < Fix::ZERO) => Fix::MIN,
        None => Fix::MAX,
    }
}

/// `e^x`, saturating.
pub fn exp(x: Fix) -> Fix {
    Fix::saturating_from_num(x.to_num::<f64>().exp())
}

/// Natural logarithm. Non positive arguments yield [`Fix::MIN`].
pub fn ln(x: Fix) -> Fix {
    if x <= Fix::ZERO {
        return Fix::MIN;
    }
    Fix::saturating_from_num(x.to_num::<f64>().ln())
}

/// Exponential moving average of `new` onto `prev`, where the weight of `prev` decays with the
/// time `dt` elapsed since it was computed, relative to the time constant `tau`.
pub fn ema(prev: Fix, new: Fix, dt: Fix, tau: Fix) -> Fix {
    let weight = exp(div(dt.saturating_neg(), tau));
    prev.saturating_mul(weight)
        .saturating_add(new.saturating_mul(Fix::ONE.saturating_sub(weight)))
}

/// Length of a time span in seconds. Spans shorter than a quarter second are rounded up to a
/// quarter second.
pub fn seconds(span: Duration) -> Fix {
    let secs = Fix::saturating_from_num(span.as_secs_f64());
    secs.max(MIN_SECONDS)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn quarter_second_minimum() {
        assert_eq!(seconds(Duration::ZERO), Fix::from_num(0.25));
        assert_eq!(seconds(Duration::from_millis(100)), Fix::from_num(0.25));
        assert_eq!(seconds(Duration::from_millis(1500)), Fix::from_num(1.5));
    }

    #[test]
    fn long_spans_saturate() {
        assert_eq!(seconds(Duration::from_secs(100_000)), Fix::MAX);
    }

    #[test]
    fn division_saturates() {
        assert_eq!(div(from_int(1), Fix::ZERO), Fix::MAX);
        assert_eq!(div(from_int(-1), Fix::ZERO), Fix::MIN);
        assert_eq!(div(from_int(30_000), Fix::from_num(0.25)), Fix::MAX);
        assert_eq!(div(from_int(-30_000), Fix::from_num(0.25)), Fix::MIN);
        assert_eq!(div(from_int(-30_000), Fix::from_num(-0.25)), Fix::MAX);
        assert_eq!(div(from_int(10), from_int(4)), Fix::from_num(2.5));
    }

    #[test]
    fn ema_weights_by_elapsed_time() {
        let tau = from_int(10);
        // No time elapsed: the previous value is kept.
        assert_eq!(ema(from_int(-80), from_int(-60), Fix::ZERO, tau), from_int(-80));
        // Long elapsed time: the new value dominates.
        let v = ema(from_int(-80), from_int(-60), from_int(100), tau);
        assert!((v - from_int(-60)).abs() < Fix::from_num(0.01));
        // One time constant: ~63% of the way to the new value.
        let v = ema(Fix::ZERO, from_int(100), tau, tau);
        assert_eq!(to_int(v), 63);
    }

    #[test]
    fn log_of_non_positive() {
        assert_eq!(ln(Fix::ZERO), Fix::MIN);
        assert_eq!(to_int(ln(exp(from_int(2)))), 2);
    }

    #[test]
    fn rounding_is_away_from_zero() {
        assert_eq!(to_int(Fix::from_num(2.5)), 3);
        assert_eq!(to_int(Fix::from_num(-2.5)), -3);
        assert_eq!(to_int(Fix::from_num(2.25)), 2);
    }
}
