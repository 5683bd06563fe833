//! Absolute and relative date expressions.
//!
//! Accepted inputs:
//! - `"now"` → `None` (open-ended, live end of a window)
//! - `"<N> <unit>[s] ago"` with unit one of second, minute, hour, day,
//!   week, month, year (case-insensitive)
//! - an absolute date: RFC 3339, RFC 2822, `YYYY-MM-DD[ HH:MM[:SS[.fff]]]`
//!   (naive values are read as UTC)

use crate::error::MapCardError;
use crate::state::LinkedState;
use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, SecondsFormat, Timelike, Utc};

/// Suffix applied to numeric linked-entity states when none is configured.
pub const DEFAULT_NUMERIC_SUFFIX: &str = "hours ago";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Convert a date expression relative to the current time.
pub fn to_absolute(input: &str) -> Result<Option<DateTime<Utc>>, MapCardError> {
    to_absolute_at(input, Utc::now())
}

/// Convert a date expression relative to `now`.
pub fn to_absolute_at(
    input: &str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, MapCardError> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("now") {
        return Ok(None);
    }

    if let Some((amount, unit)) = parse_relative(trimmed) {
        return subtract(now, amount, unit)
            .map(Some)
            .ok_or_else(|| MapCardError::InvalidDateFormat(input.to_string()));
    }

    parse_absolute(trimmed)
        .map(Some)
        .ok_or_else(|| MapCardError::InvalidDateFormat(input.to_string()))
}

/// Build a date from a linked entity's state and an optional suffix.
///
/// Numeric states default to the `"hours ago"` suffix; text states are
/// expected to be a date on their own.
pub fn derive_from_state(
    state: &LinkedState,
    suffix: Option<&str>,
) -> Result<Option<DateTime<Utc>>, MapCardError> {
    derive_from_state_at(state, suffix, Utc::now())
}

pub fn derive_from_state_at(
    state: &LinkedState,
    suffix: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, MapCardError> {
    let suffix = match (suffix, state) {
        (Some(s), _) => Some(s),
        (None, LinkedState::Number(_)) => Some(DEFAULT_NUMERIC_SUFFIX),
        (None, LinkedState::Text(_)) => None,
    };

    let value = state.to_expression_value();
    let expression = match suffix {
        Some(s) if !s.is_empty() => format!("{} {}", value, s),
        _ => value,
    };

    to_absolute_at(&expression, now)
}

/// Truncate to 00:00:00.000 UTC of the same day.
pub fn truncate_to_midnight(date: DateTime<Utc>) -> DateTime<Utc> {
    date.with_hour(0)
        .and_then(|d| d.with_minute(0))
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(date)
}

/// ISO 8601 with millisecond precision and a `Z` suffix.
pub fn to_iso_millis(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

fn parse_relative(input: &str) -> Option<(u32, Unit)> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    if parts.len() != 3 || !parts[2].eq_ignore_ascii_case("ago") {
        return None;
    }
    if parts[0].is_empty() || !parts[0].chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let amount = parts[0].parse::<u32>().ok()?;

    let unit = parts[1].to_ascii_lowercase();
    let unit = unit.strip_suffix('s').unwrap_or(&unit);
    let unit = match unit {
        "second" => Unit::Second,
        "minute" => Unit::Minute,
        "hour" => Unit::Hour,
        "day" => Unit::Day,
        "week" => Unit::Week,
        "month" => Unit::Month,
        "year" => Unit::Year,
        _ => return None,
    };
    Some((amount, unit))
}

fn subtract(now: DateTime<Utc>, amount: u32, unit: Unit) -> Option<DateTime<Utc>> {
    let amount_i = i64::from(amount);
    match unit {
        Unit::Second => now.checked_sub_signed(Duration::try_seconds(amount_i)?),
        Unit::Minute => now.checked_sub_signed(Duration::try_minutes(amount_i)?),
        Unit::Hour => now.checked_sub_signed(Duration::try_hours(amount_i)?),
        Unit::Day => now.checked_sub_signed(Duration::try_days(amount_i)?),
        Unit::Week => now.checked_sub_signed(Duration::try_weeks(amount_i)?),
        Unit::Month => now.checked_sub_months(Months::new(amount)),
        Unit::Year => now.checked_sub_months(Months::new(amount.checked_mul(12)?)),
    }
}

fn parse_absolute(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(input) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(input) {
        return Some(date.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_now_is_open_ended() {
        assert_eq!(to_absolute_at("now", fixed_now()).unwrap(), None);
    }

    #[test]
    fn test_relative_units() {
        let now = fixed_now();
        let cases = [
            ("30 seconds ago", now - Duration::seconds(30)),
            ("1 minute ago", now - Duration::minutes(1)),
            ("2 hours ago", now - Duration::hours(2)),
            ("3 days ago", now - Duration::days(3)),
            ("1 week ago", now - Duration::weeks(1)),
            ("1 month ago", Utc.with_ymd_and_hms(2024, 2, 15, 12, 30, 0).unwrap()),
            ("2 years ago", Utc.with_ymd_and_hms(2022, 3, 15, 12, 30, 0).unwrap()),
        ];

        for (input, expected) in cases {
            assert_eq!(to_absolute_at(input, now).unwrap(), Some(expected), "{}", input);
        }
    }

    #[test]
    fn test_relative_is_case_insensitive() {
        let now = fixed_now();
        assert_eq!(
            to_absolute_at("5 HOURS AGO", now).unwrap(),
            Some(now - Duration::hours(5))
        );
        assert_eq!(
            to_absolute_at("1 Day Ago", now).unwrap(),
            Some(now - Duration::days(1))
        );
    }

    #[test]
    fn test_relative_against_wall_clock() {
        let before = Utc::now();
        let result = to_absolute("2 hours ago").unwrap().unwrap();
        let after = Utc::now();

        assert!(result >= before - Duration::hours(2));
        assert!(result <= after - Duration::hours(2));
    }

    #[test]
    fn test_absolute_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(to_absolute_at("2024-01-01T00:00:00Z", fixed_now()).unwrap(), Some(expected));
        assert_eq!(to_absolute_at("2024-01-01", fixed_now()).unwrap(), Some(expected));
        assert_eq!(to_absolute_at("2024-01-01 00:00:00", fixed_now()).unwrap(), Some(expected));
        assert_eq!(
            to_absolute_at("2024-01-01T02:00:00+02:00", fixed_now()).unwrap(),
            Some(expected)
        );
    }

    #[test]
    fn test_unparseable_input_is_an_error() {
        let err = to_absolute_at("not-a-date", fixed_now()).unwrap_err();
        assert_eq!(err, MapCardError::InvalidDateFormat("not-a-date".to_string()));

        assert!(to_absolute_at("2.5 hours ago", fixed_now()).is_err());
        assert!(to_absolute_at("3 fortnights ago", fixed_now()).is_err());
    }

    #[test]
    fn test_derive_numeric_state_defaults_to_hours() {
        let now = fixed_now();
        let date = derive_from_state_at(&LinkedState::Number(6.0), None, now).unwrap();
        assert_eq!(date, Some(now - Duration::hours(6)));
    }

    #[test]
    fn test_derive_numeric_state_with_suffix() {
        let now = fixed_now();
        let date = derive_from_state_at(&LinkedState::Number(2.0), Some("days ago"), now).unwrap();
        assert_eq!(date, Some(now - Duration::days(2)));
    }

    #[test]
    fn test_derive_text_state_is_a_date() {
        let date = derive_from_state_at(
            &LinkedState::Text("2024-01-01T00:00:00Z".into()),
            None,
            fixed_now(),
        )
        .unwrap();
        assert_eq!(date, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_truncate_to_midnight_and_format() {
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 17, 45, 12).unwrap();
        assert_eq!(to_iso_millis(truncate_to_midnight(date)), "2024-01-01T00:00:00.000Z");
    }
}
