//! Lightweight cron rule, evaluated in a job's own time zone.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Items: *, */N, N, A-B, A-B/N, comma lists; `L` in DOM = last day of month.
//! DOW: 0 or 7 = Sunday, 1 = Monday … 6 = Saturday.
//! Example: "0 9 * * 1-5" = weekdays at 09:00 local time.
//!
//! Occurrences are resolved date by date in the zone, so every candidate is
//! converted with the offset rules of its own day, never a cached offset.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use scrumbot_core::error::{Result, ScrumError};
use scrumbot_core::zone::local_to_utc;

/// Longest run of non-matching days searched (covers "29 2 *" leap rules).
const MAX_SEARCH_DAYS: u32 = 366 * 5;

/// A parsed cron rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronRule {
    expression: String,
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days: Vec<u32>,
    last_day: bool,
    any_day: bool,
    months: Vec<u32>,
    weekdays: Vec<u32>,
    any_weekday: bool,
}

impl CronRule {
    /// Parse a 5-field expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(ScrumError::InvalidSchedule(format!(
                "'{expression}' (need 5 fields: MIN HOUR DOM MON DOW)"
            )));
        }
        let invalid = |field: &str| {
            ScrumError::InvalidSchedule(format!("bad field '{field}' in '{expression}'"))
        };

        let minutes = parse_field(parts[0], 0, 59).ok_or_else(|| invalid(parts[0]))?;
        let hours = parse_field(parts[1], 0, 23).ok_or_else(|| invalid(parts[1]))?;

        let any_day = parts[2] == "*";
        let mut last_day = false;
        let mut days = Vec::new();
        for item in parts[2].split(',') {
            if item == "L" {
                last_day = true;
            } else {
                days.extend(parse_field(item, 1, 31).ok_or_else(|| invalid(parts[2]))?);
            }
        }

        let months = parse_field(parts[3], 1, 12).ok_or_else(|| invalid(parts[3]))?;

        let any_weekday = parts[4] == "*";
        let mut weekdays: Vec<u32> = parse_field(parts[4], 0, 7)
            .ok_or_else(|| invalid(parts[4]))?
            .into_iter()
            .map(|d| d % 7)
            .collect();
        weekdays.sort_unstable();
        weekdays.dedup();

        Ok(Self {
            expression: expression.to_string(),
            minutes,
            hours,
            days,
            last_day,
            any_day,
            months,
            weekdays,
            any_weekday,
        })
    }

    /// Rule firing at `start` every day, or Monday–Friday only.
    pub fn daily_at(start: NaiveTime, weekdays_only: bool) -> Self {
        let dow = if weekdays_only { "1-5" } else { "*" };
        Self {
            expression: format!("{} {} * * {dow}", start.minute(), start.hour()),
            minutes: vec![start.minute()],
            hours: vec![start.hour()],
            days: Vec::new(),
            last_day: false,
            any_day: true,
            months: (1..=12).collect(),
            weekdays: if weekdays_only { (1..=5).collect() } else { (0..=6).collect() },
            any_weekday: !weekdays_only,
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the rule allows any occurrence on this local date.
    /// Day-of-month and day-of-week restrictions must both hold.
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.months.contains(&date.month()) {
            return false;
        }
        if !self.any_day {
            let is_last = date.succ_opt().is_none_or(|next| next.month() != date.month());
            if !(self.days.contains(&date.day()) || (self.last_day && is_last)) {
                return false;
            }
        }
        self.any_weekday || self.weekdays.contains(&date.weekday().num_days_from_sunday())
    }

    /// First occurrence strictly after `after`, as a UTC instant.
    pub fn next_after(&self, after: DateTime<Utc>, tz: &Tz) -> Option<DateTime<Utc>> {
        let mut date = after.with_timezone(tz).date_naive();
        for _ in 0..MAX_SEARCH_DAYS {
            if self.matches_date(date) {
                for &hour in &self.hours {
                    for &minute in &self.minutes {
                        let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                            continue;
                        };
                        match local_to_utc(tz, naive) {
                            Some(utc) if utc > after => return Some(utc),
                            _ => {}
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }
        tracing::warn!("⚠️ Cron rule '{}' has no occurrence within search window", self.expression);
        None
    }
}

impl std::fmt::Display for CronRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Parse a cron field into a sorted list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    let mut values = Vec::new();
    for item in field.split(',') {
        let item = item.trim();
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let n: u32 = step.parse().ok()?;
                if n == 0 {
                    return None;
                }
                (range, n)
            }
            None => (item, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (a.parse().ok()?, b.parse().ok()?)
        } else {
            let n: u32 = range.parse().ok()?;
            // "N/step" runs from N to the end of the range.
            if step > 1 { (n, max) } else { (n, n) }
        };

        if lo < min || hi > max || lo > hi {
            return None;
        }
        values.extend((lo..=hi).step_by(step as usize));
    }
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    values.dedup();
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_specific_time() {
        let rule = CronRule::parse("0 8 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 7, 0, 0).unwrap();
        let next = rule.next_after(after, &Tz::UTC).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 22, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_every_15_minutes() {
        let rule = CronRule::parse("*/15 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 0).unwrap();
        let next = rule.next_after(after, &Tz::UTC).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn test_equal_instant_moves_forward() {
        let rule = CronRule::parse("30 9 * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap();
        let next = rule.next_after(at, &Tz::UTC).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 5, 5, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_weekday_range_skips_weekend() {
        let rule = CronRule::parse("0 9 * * 1-5").unwrap();
        // Friday 2026-10-16 after 09:00 → Monday 2026-10-19.
        let after = Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).unwrap();
        let next = rule.next_after(after, &Tz::UTC).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_last_day_of_month() {
        let rule = CronRule::parse("0 0 L * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 2, 3, 0, 0, 0).unwrap();
        let next = rule.next_after(after, &Tz::UTC).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap());

        let after = next;
        let next = rule.next_after(after, &Tz::UTC).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_mid_month_and_last_day_list() {
        let rule = CronRule::parse("0 0 15,L * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 4, 15, 0, 0, 0).unwrap();
        let next = rule.next_after(after, &Tz::UTC).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 4, 30, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_daily_at_matches_parsed_form() {
        let start = NaiveTime::from_hms_opt(9, 15, 0).unwrap();
        let built = CronRule::daily_at(start, true);
        assert_eq!(built.expression(), "15 9 * * 1-5");
        let parsed = CronRule::parse("15 9 * * 1-5").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap();
        assert_eq!(
            built.next_after(after, &Tz::UTC),
            parsed.next_after(after, &Tz::UTC)
        );
    }

    #[test]
    fn test_zone_offset_follows_dst() {
        // 09:00 in New York is 13:00 UTC in summer and 14:00 UTC in winter.
        let rule = CronRule::daily_at(NaiveTime::from_hms_opt(9, 0, 0).unwrap(), false);
        let tz = chrono_tz::America::New_York;
        let summer = Utc.with_ymd_and_hms(2026, 10, 30, 12, 0, 0).unwrap();
        assert_eq!(rule.next_after(summer, &tz).unwrap().hour(), 13);
        // Fall-back happens on 2026-11-01.
        let winter = Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap();
        assert_eq!(
            rule.next_after(winter, &tz).unwrap(),
            Utc.with_ymd_and_hms(2026, 11, 1, 14, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_sunday_as_seven() {
        let rule = CronRule::parse("0 12 * * 7").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 10, 14, 0, 0, 0).unwrap();
        let next = rule.next_after(after, &Tz::UTC).unwrap();
        assert_eq!(next.weekday(), chrono::Weekday::Sun);
    }

    #[test]
    fn test_invalid_expression() {
        assert!(CronRule::parse("bad").is_err());
        assert!(CronRule::parse("61 * * * *").is_err());
        assert!(CronRule::parse("0 9 * * 5-1").is_err());
        assert!(CronRule::parse("*/0 * * * *").is_err());
    }
}
