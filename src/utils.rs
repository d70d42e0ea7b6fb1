//! Rounding helpers for report values.
//!
//! Reports show times in milliseconds and shares in percent, both with three
//! decimals.

use crate::trace::constants::MS_PER_SEC;

/// Round `value` to `decimals` places.
///
/// # Examples
///
/// ```
/// use perfview::utils::round_to;
/// assert_eq!(round_to(1.23456, 3), 1.235);
/// ```
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Seconds to milliseconds, rounded to 3 decimals.
pub fn secs_to_ms(secs: f64) -> f64 {
    round_to(secs * MS_PER_SEC, 3)
}

/// `part` as a percentage of `whole`, rounded to 3 decimals. Zero when
/// `whole` is not positive.
pub fn percent_of(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        round_to(100.0 * part / whole, 3)
    } else {
        0.0
    }
}
