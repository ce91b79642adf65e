use chrono::TimeDelta;

const FLOAT_TO_INT_MAX: f64 = 9007199254740991_f64;

/// Converting float to int has undefined behaviour for huge floats: https://stackoverflow.com/a/41139453.
/// To avoid this, refuse to convert floats with magnitude greater than 2**53 - 1, after which 64-bit floats no longer
/// retain integer precision. We could go a few orders of magnitude higher without triggering the UB, but this seems like
/// the least surprising place to put a breakpoint.
pub(crate) fn f64_to_i64_safe(f: f64) -> Option<i64> {
    if f.abs() <= FLOAT_TO_INT_MAX {
        Some(f as i64)
    } else {
        None
    }
}

/// Truncates a UNIX epoch millisecond timestamp to midnight UTC of the same day.
///
/// Used for DATETIME equality, which compares calendar days.
pub(crate) fn truncate_to_day(millis: f64) -> f64 {
    truncate_millis(millis, TimeDelta::days(1))
}

/// Truncates a UNIX epoch millisecond timestamp to the start of its minute.
///
/// Used for DATETIME ordering comparisons (>=, <=, between), which ignore seconds.
pub(crate) fn truncate_to_minute(millis: f64) -> f64 {
    truncate_millis(millis, TimeDelta::minutes(1))
}

// Whole-millisecond arithmetic: chrono's nanosecond rounding overflows outside 1677..2262.
// Magnitudes above 2**53 are compared as given.
fn truncate_millis(millis: f64, unit: TimeDelta) -> f64 {
    let unit = unit.num_milliseconds();
    match f64_to_i64_safe(millis) {
        Some(millis) => (millis - millis.rem_euclid(unit)) as f64,
        None => millis,
    }
}
