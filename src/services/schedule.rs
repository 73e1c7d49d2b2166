use chrono::{Datelike, Months, NaiveDate};

use crate::models::RecurrencePattern;

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

/// First date matching the schedule that is on or after `start`.
/// `day_of_month` is capped at 28 by template validation, so every candidate
/// date exists.
pub fn first_occurrence(
    pattern: RecurrencePattern,
    start: NaiveDate,
    day_of_month: Option<u32>,
    month_of_year: Option<u32>,
) -> NaiveDate {
    match pattern {
        RecurrencePattern::OneTime => start,
        RecurrencePattern::Monthly => {
            let day = day_of_month.unwrap_or(start.day());
            let candidate = start.with_day(day).unwrap_or(start);
            if candidate >= start {
                candidate
            } else {
                (start + Months::new(1)).with_day(day).unwrap_or(candidate)
            }
        }
        RecurrencePattern::Yearly => {
            let month = month_of_year.unwrap_or(start.month());
            let day = day_of_month.unwrap_or(start.day());
            let candidate =
                NaiveDate::from_ymd_opt(start.year(), month, day).unwrap_or(start);
            if candidate >= start {
                candidate
            } else {
                NaiveDate::from_ymd_opt(start.year() + 1, month, day).unwrap_or(candidate)
            }
        }
    }
}

/// Advance a scheduled date one period. MONTHLY keeps the configured
/// day_of_month; YEARLY keeps month and day.
pub fn advance_one_period(
    pattern: RecurrencePattern,
    current: NaiveDate,
    day_of_month: Option<u32>,
) -> NaiveDate {
    match pattern {
        RecurrencePattern::OneTime => current,
        RecurrencePattern::Monthly => {
            let next = current + Months::new(1);
            match day_of_month {
                Some(day) => next.with_day(day).unwrap_or(next),
                None => next,
            }
        }
        RecurrencePattern::Yearly => current + Months::new(12),
    }
}

/// Recompute next_scheduled_date after a schedule-field update:
/// max(last_generated_date + 1 period, first occurrence from start_date).
pub fn recompute_next(
    pattern: RecurrencePattern,
    start: NaiveDate,
    last_generated: Option<NaiveDate>,
    day_of_month: Option<u32>,
    month_of_year: Option<u32>,
) -> NaiveDate {
    let from_start = first_occurrence(pattern, start, day_of_month, month_of_year);
    match last_generated {
        Some(last) => advance_one_period(pattern, last, day_of_month).max(from_start),
        None => from_start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_first_occurrence_monthly_same_month() {
        let next = first_occurrence(RecurrencePattern::Monthly, date(2026, 1, 3), Some(15), None);
        assert_eq!(next, date(2026, 1, 15));
    }

    #[test]
    fn test_first_occurrence_monthly_rolls_to_next_month() {
        let next = first_occurrence(RecurrencePattern::Monthly, date(2026, 1, 20), Some(15), None);
        assert_eq!(next, date(2026, 2, 15));
    }

    #[test]
    fn test_first_occurrence_yearly_rolls_to_next_year() {
        let next = first_occurrence(
            RecurrencePattern::Yearly,
            date(2026, 6, 1),
            Some(15),
            Some(3),
        );
        assert_eq!(next, date(2027, 3, 15));
    }

    #[test]
    fn test_advance_monthly_keeps_day() {
        let next = advance_one_period(RecurrencePattern::Monthly, date(2026, 1, 28), Some(28));
        assert_eq!(next, date(2026, 2, 28));
    }

    #[test]
    fn test_advance_monthly_across_year_end() {
        let next = advance_one_period(RecurrencePattern::Monthly, date(2026, 12, 1), Some(1));
        assert_eq!(next, date(2027, 1, 1));
    }

    #[test]
    fn test_advance_yearly_keeps_month_and_day() {
        let next = advance_one_period(RecurrencePattern::Yearly, date(2026, 3, 15), Some(15));
        assert_eq!(next, date(2027, 3, 15));
    }

    #[test]
    fn test_recompute_prefers_period_after_last_generated() {
        let next = recompute_next(
            RecurrencePattern::Monthly,
            date(2026, 1, 1),
            Some(date(2026, 3, 1)),
            Some(1),
            None,
        );
        assert_eq!(next, date(2026, 4, 1));
    }

    #[test]
    fn test_recompute_without_history_uses_start() {
        let next = recompute_next(RecurrencePattern::Monthly, date(2026, 2, 10), None, Some(5), None);
        assert_eq!(next, date(2026, 3, 5));
    }
}
