//! Compact share durations: `<digits><unit>`, e.g. `90m`, `3d`, `6mo`.

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid duration {input:?}: {reason}")]
pub struct DurationError {
    pub input: String,
    pub reason: &'static str,
}

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Seconds per unit. A month is 30 days and a year is 365 days.
fn unit_seconds(unit: &str) -> Option<i64> {
    match unit {
        "s" => Some(1),
        "m" => Some(MINUTE),
        "h" => Some(HOUR),
        "d" => Some(DAY),
        "w" => Some(7 * DAY),
        "mo" => Some(30 * DAY),
        "y" => Some(365 * DAY),
        _ => None,
    }
}

/// Parse a share duration. Surrounding whitespace is ignored; the amount must be a positive
/// integer and the unit one of `s m h d w mo y`.
pub fn parse_share_duration(input: &str) -> Result<Duration, DurationError> {
    let fail = |reason| DurationError {
        input: input.to_string(),
        reason,
    };

    let s = input.trim();
    if s.is_empty() {
        return Err(fail("empty duration"));
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| fail("missing unit"))?;
    let (amount, unit) = s.split_at(split);
    if amount.is_empty() {
        return Err(fail("missing amount"));
    }

    let amount: i64 = amount.parse().map_err(|_| fail("amount out of range"))?;
    if amount == 0 {
        return Err(fail("duration must be positive"));
    }
    let per_unit = unit_seconds(unit).ok_or_else(|| fail("unknown unit"))?;

    amount
        .checked_mul(per_unit)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| fail("amount out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_unit() {
        assert_eq!(parse_share_duration("45s").unwrap(), Duration::seconds(45));
        assert_eq!(parse_share_duration("90m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_share_duration("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_share_duration("3d").unwrap(), Duration::hours(72));
        assert_eq!(parse_share_duration("1w").unwrap(), Duration::hours(168));
        assert_eq!(parse_share_duration("6mo").unwrap(), Duration::hours(4320));
        assert_eq!(parse_share_duration("1y").unwrap(), Duration::hours(8760));
    }

    #[test]
    fn ignores_surrounding_whitespace() {
        assert_eq!(parse_share_duration("  3d\n").unwrap(), Duration::days(3));
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["", "   ", "abc", "12", "d", "3x", "3 d", "-1d", "0h", "1.5h", "3D", "mo"] {
            assert!(parse_share_duration(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn rejects_overflow() {
        let err = parse_share_duration("99999999999999999y").unwrap_err();
        assert_eq!(err.reason, "amount out of range");
        assert!(parse_share_duration("9223372036854775807y").is_err());
    }
}
