//! Unit conversions between device encodings and stored units
//!
//! FIT devices are built around small integer encodings that save space on
//! the watch:
//!
//! - **Positions** are stored as *semicircles*: a signed 32-bit integer where
//!   2^31 semicircles = 180 degrees.
//! - **Times** are seconds since the *ANT epoch*, 1989-12-31T00:00:00Z, which
//!   sits 631,065,600 seconds after the Unix epoch.
//! - **Compressed times**: monitoring streams elide most full 32-bit
//!   timestamps and send only the low 16 bits, relying on the reader to
//!   remember the last full value.
//!
//! Everything here is a pure function. The display formatters at the bottom
//! are used by the report views.

use chrono::{DateTime, Utc};

/// Seconds between the Unix epoch and the ANT epoch (1989-12-31T00:00:00Z)
pub const ANT_EPOCH_OFFSET: i64 = 631_065_600;

/// 2^31 semicircles make half a turn
const SEMICIRCLES_PER_HALF_TURN: f64 = 2_147_483_648.0;

/// Decimal places kept for degrees (~0.1m resolution at the equator)
const DEGREE_DECIMALS: i32 = 6;

const METERS_PER_MILE: f64 = 1609.344;

/// Convert a semicircle coordinate to degrees, rounded to 6 decimal places.
///
/// Total over `i32`: the result always lies in `[-180, 180]`.
///
/// ```
/// use localfit::convert::semicircles_to_degrees;
/// assert_eq!(semicircles_to_degrees(493_499_921), 41.364686);
/// ```
pub fn semicircles_to_degrees(semicircles: i32) -> f64 {
    let degrees = f64::from(semicircles) * (180.0 / SEMICIRCLES_PER_HALF_TURN);
    round_to(degrees, DEGREE_DECIMALS)
}

/// Convert degrees back to semicircles.
///
/// Not an exact inverse of [`semicircles_to_degrees`] because of the rounding
/// there. Saturates at the `i32` range (+180 degrees is one semicircle past
/// `i32::MAX`).
pub fn degrees_to_semicircles(degrees: f64) -> i32 {
    let semicircles = (degrees * (SEMICIRCLES_PER_HALF_TURN / 180.0)).round();
    semicircles.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

/// Convert ANT-epoch seconds to a UTC timestamp.
pub fn ant_to_utc(ant_seconds: u32) -> DateTime<Utc> {
    let unix = i64::from(ant_seconds) + ANT_EPOCH_OFFSET;
    // u32 + offset is far inside chrono's representable range
    DateTime::from_timestamp(unix, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Rebuild a full 32-bit ANT timestamp from its 16-bit low-order suffix.
///
/// The suffix replaces the low 16 bits of the last full timestamp. If that
/// would move time backwards the high half is bumped by one (the 16-bit
/// counter rolled over), so the result is never earlier than `last_full`.
pub fn reconcile_timestamp_16(last_full: u32, suffix: u16) -> u32 {
    let delta = u32::from(suffix).wrapping_sub(last_full & 0xFFFF) & 0xFFFF;
    last_full.wrapping_add(delta)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// ============================================================================
// Display formatting
// ============================================================================

/// Format a distance in meters as miles, e.g. `"3.11 mi"`.
pub fn format_distance(meters: f64, decimals: usize) -> String {
    let miles = meters / METERS_PER_MILE;
    let fixed = format!("{:.*}", decimals, miles);
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (fixed.as_str(), None),
    };

    let mut out = group_thousands(int_part);
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out.push_str(" mi");
    out
}

/// Format a duration in seconds as `H:MM:SS` (hours are not wrapped at 24).
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Format a count with thousands separators, e.g. `"12,345"`.
pub fn format_count(count: i64) -> String {
    let digits = count.unsigned_abs().to_string();
    let grouped = group_thousands(&digits);
    if count < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

/// Format a UTC timestamp for listings, e.g. `"May 04, 2019 14:03"`.
pub fn format_date(at: &DateTime<Utc>) -> String {
    at.format("%b %d, %Y %H:%M").to_string()
}

fn group_thousands(digits: &str) -> String {
    let (sign, digits) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };

    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    format!("{}{}", sign, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // ==========================================================================
    // SEMICIRCLE CONVERSION TESTS
    // ==========================================================================
    //
    // 180 degrees = 2^31 semicircles, so one semicircle is ~8.4e-8 degrees.
    // Rounding to 6 places loses at most 0.5e-6 degrees, which is why the
    // round-trip tests compare against a tolerance instead of exact values.
    // ==========================================================================

    /// Unrounded reference conversion
    fn reference_degrees(semicircles: i32) -> f64 {
        f64::from(semicircles) * 180.0 / 2f64.powi(31)
    }

    /// Deterministic spread of inputs across the whole i32 range
    fn sample_semicircles() -> Vec<i32> {
        let mut values = vec![i32::MIN, i32::MIN + 1, -1, 0, 1, i32::MAX - 1, i32::MAX];
        let mut x: i64 = i64::from(i32::MIN);
        while x <= i64::from(i32::MAX) {
            values.push(x as i32);
            x += 104_729_113; // prime stride
        }
        values
    }

    #[test]
    fn test_known_coordinate() {
        assert_eq!(semicircles_to_degrees(493_499_921), 41.364686);
    }

    #[test]
    fn test_degrees_stay_in_range() {
        for s in sample_semicircles() {
            let deg = semicircles_to_degrees(s);
            assert!((-180.0..=180.0).contains(&deg), "{} -> {}", s, deg);
        }
        assert_eq!(semicircles_to_degrees(i32::MIN), -180.0);
    }

    #[test]
    fn test_degrees_within_half_microdegree_of_reference() {
        for s in sample_semicircles() {
            let err = (semicircles_to_degrees(s) - reference_degrees(s)).abs();
            assert!(err <= 0.5e-6 + 1e-12, "{}: error {}", s, err);
        }
    }

    #[test]
    fn test_round_trip_error_bounded() {
        for s in sample_semicircles() {
            let deg = semicircles_to_degrees(s);
            let back = degrees_to_semicircles(deg);
            let err = (reference_degrees(back) - deg).abs();
            assert!(err <= 0.5e-6, "{} -> {} -> {}: error {}", s, deg, back, err);
        }
    }

    #[test]
    fn test_degrees_to_semicircles_saturates() {
        assert_eq!(degrees_to_semicircles(180.0), i32::MAX);
        assert_eq!(degrees_to_semicircles(-180.0), i32::MIN);
        assert_eq!(degrees_to_semicircles(0.0), 0);
    }

    // ==========================================================================
    // ANT EPOCH TESTS
    // ==========================================================================

    #[test]
    fn test_ant_epoch_zero() {
        let expected = Utc.with_ymd_and_hms(1989, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(ant_to_utc(0), expected);
    }

    #[test]
    fn test_ant_offset_is_exact() {
        for a in [0u32, 1, 60, 925_000_000, u32::MAX] {
            assert_eq!(ant_to_utc(a).timestamp(), i64::from(a) + 631_065_600);
        }
    }

    #[test]
    fn test_ant_to_utc_known_instant() {
        // 2019-05-04T14:03:20Z
        let at = ant_to_utc(925_913_000);
        assert_eq!(at, Utc.with_ymd_and_hms(2019, 5, 4, 14, 3, 20).unwrap());
    }

    // ==========================================================================
    // 16-BIT TIMESTAMP RECONCILIATION TESTS
    // ==========================================================================
    //
    // Monitoring files send `timestamp_16` (low 16 bits only) between full
    // timestamps. 65536 seconds is ~18 hours, so a gap of up to that long
    // can be reconstructed unambiguously.
    // ==========================================================================

    #[test]
    fn test_matching_suffix_is_identity() {
        for last in [0u32, 100_000, 925_826_600, u32::MAX] {
            assert_eq!(reconcile_timestamp_16(last, (last & 0xFFFF) as u16), last);
        }
    }

    #[test]
    fn test_suffix_one_behind_wraps_forward() {
        let last = 100_000u32;
        let suffix = ((last & 0xFFFF) as u16).wrapping_sub(1);
        let rebuilt = reconcile_timestamp_16(last, suffix);
        assert_eq!(rebuilt, last + 65_535);
        assert!(rebuilt >= last);
    }

    #[test]
    fn test_suffix_ahead_without_wrap() {
        let last = 0x0001_0010u32;
        assert_eq!(reconcile_timestamp_16(last, 0x0020), 0x0001_0020);
    }

    #[test]
    fn test_suffix_crossing_16_bit_boundary() {
        let last = 0x0001_FFF0u32;
        assert_eq!(reconcile_timestamp_16(last, 0x0005), 0x0002_0005);
    }

    #[test]
    fn test_reconciled_never_earlier_than_last() {
        let last = 925_826_600u32;
        for suffix in (0..=u16::MAX).step_by(997) {
            assert!(reconcile_timestamp_16(last, suffix) >= last);
        }
    }

    // ==========================================================================
    // DISPLAY FORMATTING TESTS
    // ==========================================================================

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(5000.0, 2), "3.11 mi");
        assert_eq!(format_distance(0.0, 2), "0.00 mi");
        assert_eq!(format_distance(1_609_344.0 * 1.5, 0), "1,500 mi");
        assert_eq!(format_distance(1_609_344.0, 1), "1,000.0 mi");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "0:00:00");
        assert_eq!(format_duration(59.4), "0:00:59");
        assert_eq!(format_duration(3723.0), "1:02:03");
        assert_eq!(format_duration(90_000.0), "25:00:00");
        assert_eq!(format_duration(-5.0), "0:00:00");
        assert_eq!(format_duration(f64::NAN), "0:00:00");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(12_345), "12,345");
        assert_eq!(format_count(-1_234_567), "-1,234,567");
    }

    #[test]
    fn test_format_date() {
        let at = Utc.with_ymd_and_hms(2019, 5, 4, 14, 3, 20).unwrap();
        assert_eq!(format_date(&at), "May 04, 2019 14:03");
    }
}
