// ISO-8601 durations
//
// Dynamic templates carry a `valid_duration` such as "P30D" or "P1M2DT12H".
// A child code expires that long after it is issued.

use crate::error::{DiscountError, DiscountResult};
use chrono::{DateTime, Duration, Months, Utc};
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;

const DURATION_PATTERN: &str = r"^P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:[.,]\d+)?)S)?)?$";

fn duration_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(DURATION_PATTERN).expect("duration pattern is valid"))
}

/// Parsed ISO-8601 duration (`PnYnMnWnDTnHnMnS`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsoDuration {
    pub years: u32,
    pub months: u32,
    pub weeks: u32,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    /// Seconds including the fractional part, in milliseconds
    pub millis: u64,
}

impl IsoDuration {
    /// Add the duration to `start`, calendar-aware for years and months
    ///
    /// Returns `None` when the duration or the result is out of chrono's range.
    pub fn add_to(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let total_months = self.years.checked_mul(12)?.checked_add(self.months)?;
        let shifted = start.checked_add_months(Months::new(total_months))?;

        let fixed = Duration::try_weeks(i64::from(self.weeks))?
            .checked_add(&Duration::try_days(i64::from(self.days))?)?
            .checked_add(&Duration::try_hours(i64::from(self.hours))?)?
            .checked_add(&Duration::try_minutes(i64::from(self.minutes))?)?
            .checked_add(&Duration::try_milliseconds(i64::try_from(self.millis).ok()?)?)?;

        shifted.checked_add_signed(fixed)
    }
}

impl FromStr for IsoDuration {
    type Err = DiscountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DiscountError::InvalidData(format!("Invalid ISO 8601 duration: {}", s));

        let trimmed = s.trim();
        // A time designator must be followed by at least one time component
        if trimmed.ends_with('T') {
            return Err(invalid());
        }

        let captures = duration_regex().captures(trimmed).ok_or_else(invalid)?;
        if (1..=7).all(|index| captures.get(index).is_none()) {
            return Err(invalid());
        }

        let component = |index: usize| -> Result<u32, DiscountError> {
            match captures.get(index) {
                Some(m) => m.as_str().parse::<u32>().map_err(|_| invalid()),
                None => Ok(0),
            }
        };

        let millis = match captures.get(7) {
            Some(m) => {
                let seconds = Decimal::from_str(&m.as_str().replace(',', ".")).map_err(|_| invalid())?;
                (seconds * Decimal::ONE_THOUSAND)
                    .trunc()
                    .to_u64()
                    .ok_or_else(invalid)?
            }
            None => 0,
        };

        Ok(IsoDuration {
            years: component(1)?,
            months: component(2)?,
            weeks: component(3)?,
            days: component(4)?,
            hours: component(5)?,
            minutes: component(6)?,
            millis,
        })
    }
}

/// Parse a duration string, failing with InvalidData
pub fn parse_duration(value: &str) -> DiscountResult<IsoDuration> {
    value.parse()
}

/// Compute the expiry of a code issued at `issued_at` with the given duration
pub fn expiry_from(issued_at: DateTime<Utc>, valid_duration: &str) -> DiscountResult<DateTime<Utc>> {
    let duration = parse_duration(valid_duration)?;
    duration.add_to(issued_at).ok_or_else(|| {
        DiscountError::InvalidData(format!("Duration {} is out of range", valid_duration))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_days() {
        let duration = parse_duration("P30D").unwrap();
        assert_eq!(duration.days, 30);
        assert_eq!(duration, IsoDuration { days: 30, ..Default::default() });
    }

    #[test]
    fn test_parse_full_form() {
        let duration = parse_duration("P1Y2M3W4DT5H6M7.5S").unwrap();
        assert_eq!(duration.years, 1);
        assert_eq!(duration.months, 2);
        assert_eq!(duration.weeks, 3);
        assert_eq!(duration.days, 4);
        assert_eq!(duration.hours, 5);
        assert_eq!(duration.minutes, 6);
        assert_eq!(duration.millis, 7_500);
    }

    #[test]
    fn test_parse_time_only() {
        let duration = parse_duration("PT36H").unwrap();
        assert_eq!(duration.hours, 36);
        assert_eq!(duration.days, 0);
    }

    #[test]
    fn test_minutes_vs_months() {
        assert_eq!(parse_duration("P1M").unwrap().months, 1);
        assert_eq!(parse_duration("PT1M").unwrap().minutes, 1);
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "P", "PT", "30D", "P1DT", "P-1D", "P1H", "1 day"] {
            assert!(parse_duration(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_add_is_calendar_aware() {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
        let end = parse_duration("P1M").unwrap().add_to(start).unwrap();
        // January 31st plus one month clamps to the end of February
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_oversized_duration_is_out_of_range() {
        let huge = "P4294967295WT9000000000000000S";
        let duration = parse_duration(huge).unwrap();
        assert_eq!(duration.add_to(Utc::now()), None);

        let err = expiry_from(Utc::now(), huge).unwrap_err();
        assert!(matches!(err, DiscountError::InvalidData(ref msg) if msg.contains("out of range")));

        assert!(expiry_from(Utc::now(), "P400000Y").is_err());
    }

    #[test]
    fn test_expiry_from() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let end = expiry_from(start, "P1DT2H30M").unwrap();
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 2, 2, 30, 0).unwrap());
    }
}
