use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::error::{Result, TraceLensError};

/// Epoch values below this are seconds.
const EPOCH_SECONDS_LIMIT: f64 = 1e11;
/// Epoch values below this (and at least `EPOCH_SECONDS_LIMIT`) are milliseconds; above, nanoseconds.
const EPOCH_MILLIS_LIMIT: f64 = 1e14;

/// Parses `2026-01-30 20:16:00.949` (fraction optional) as a UTC timestamp.
pub fn parse_block_timestamp(input: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(input.trim(), "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parses a time of day such as `20:16:00.949123` and places it on `date`.
pub fn parse_time_of_day(input: &str, date: NaiveDate) -> Option<DateTime<Utc>> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M:%S%.f")
        .ok()
        .map(|t| date.and_time(t).and_utc())
}

/// ISO-8601 with offset, or without one (read as UTC).
pub fn parse_iso8601(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Interprets a numeric epoch value, choosing its unit by magnitude.
pub fn epoch_to_datetime(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let nanos = if value < EPOCH_SECONDS_LIMIT {
        value * 1e9
    } else if value < EPOCH_MILLIS_LIMIT {
        value * 1e6
    } else {
        value
    };
    nanos_to_datetime(nanos as i128)
}

/// Integer variant of [`epoch_to_datetime`] that keeps nanosecond precision.
pub fn epoch_int_to_datetime(value: u64) -> Option<DateTime<Utc>> {
    let magnitude = value as f64;
    let value = i128::from(value);
    let nanos = if magnitude < EPOCH_SECONDS_LIMIT {
        value * 1_000_000_000
    } else if magnitude < EPOCH_MILLIS_LIMIT {
        value * 1_000_000
    } else {
        value
    };
    nanos_to_datetime(nanos)
}

fn nanos_to_datetime(nanos: i128) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(nanos / 1_000_000_000).ok()?;
    let subnanos = (nanos % 1_000_000_000) as u32;
    Utc.timestamp_opt(secs, subnanos).single()
}

/// Converts a millisecond count to a `Duration`; negative or non-finite input is `None`.
pub fn duration_from_ms(ms: f64) -> Option<Duration> {
    if !ms.is_finite() || ms < 0.0 {
        return None;
    }
    Some(Duration::from_nanos((ms * 1_000_000.0).round() as u64))
}

/// Parses `<number>ms` (a bare number is read as milliseconds).
pub fn parse_ms_str(input: &str) -> Option<Duration> {
    let trimmed = input.trim();
    let lower = trimmed.to_ascii_lowercase();
    let number = lower.strip_suffix("ms").unwrap_or(&lower).trim();
    number.parse::<f64>().ok().and_then(duration_from_ms)
}

/// Parses a humantime duration such as `500ms` or `2s`.
pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| TraceLensError::Parse(format!("invalid duration {input}: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn parses_block_header_timestamp() {
        let ts = parse_block_timestamp("2026-01-30 20:16:00.949").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-30T20:16:00.949+00:00");
        assert!(parse_block_timestamp("yesterday").is_none());
    }

    #[test]
    fn combines_time_of_day_with_date() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 30).unwrap();
        let ts = parse_time_of_day("20:16:00.950123", date).unwrap();
        assert_eq!(ts.day(), 30);
        assert_eq!(ts.hour(), 20);
        assert_eq!(ts.nanosecond(), 950_123_000);
    }

    #[test]
    fn parses_iso_with_and_without_offset() {
        let a = parse_iso8601("2026-01-30T20:16:00Z").unwrap();
        let b = parse_iso8601("2026-01-30T20:16:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_iso8601("nope").is_none());
    }

    #[test]
    fn epoch_scaling_by_magnitude() {
        let secs = epoch_to_datetime(1_769_804_160.0).unwrap();
        let millis = epoch_to_datetime(1_769_804_160_000.0).unwrap();
        let nanos = epoch_to_datetime(1_769_804_160_000_000_000.0).unwrap();
        assert_eq!(secs, millis);
        assert_eq!(millis, nanos);
        assert!(epoch_to_datetime(-1.0).is_none());
    }

    #[test]
    fn integer_epoch_keeps_nanos() {
        let ts = epoch_int_to_datetime(1_769_804_160_123_456_789).unwrap();
        assert_eq!(ts.timestamp(), 1_769_804_160);
        assert_eq!(ts.nanosecond(), 123_456_789);
        assert_eq!(
            epoch_int_to_datetime(1_769_804_160_000).unwrap(),
            epoch_int_to_datetime(1_769_804_160).unwrap()
        );
    }

    #[test]
    fn parses_ms_strings() {
        assert_eq!(parse_ms_str("100.5ms"), Some(Duration::from_micros(100_500)));
        assert_eq!(parse_ms_str("12 MS"), Some(Duration::from_millis(12)));
        assert_eq!(parse_ms_str("7"), Some(Duration::from_millis(7)));
        assert_eq!(parse_ms_str("fast"), None);
        assert_eq!(parse_ms_str("-3ms"), None);
    }

    #[test]
    fn parses_humantime() {
        assert_eq!(parse_duration_str("500ms").unwrap(), Duration::from_millis(500));
        assert!(parse_duration_str("soon").is_err());
    }
}
