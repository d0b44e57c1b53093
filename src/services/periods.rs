use chrono::{Datelike, NaiveDate};

use crate::error::AppError;

/// Strict calendar-date parsing. Dates move through the system as plain
/// `YYYY-MM-DD` strings and are never routed through a timezone-aware
/// type, so a date entered as the 5th can never render as the 4th.
pub fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("Invalid date '{raw}', expected YYYY-MM-DD.")))
}

/// Accepts "YYYY-MM" or any "YYYY-MM-DD" and normalizes to the first day
/// of that month, the canonical form for a fee reference month.
pub fn parse_reference_month(raw: &str) -> Result<NaiveDate, AppError> {
    let trimmed = raw.trim();
    let date = if trimmed.len() == 7 {
        NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d")
    } else {
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
    }
    .map_err(|_| {
        AppError::BadRequest(format!(
            "Invalid reference month '{raw}', expected YYYY-MM or YYYY-MM-DD."
        ))
    })?;

    month_start(date).ok_or_else(|| {
        AppError::BadRequest(format!("Invalid reference month '{raw}'."))
    })
}

pub fn month_start(date: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
}

/// "MM/YYYY" display form of a reference month.
pub fn format_month_reference(date: NaiveDate) -> String {
    format!("{:02}/{}", date.month(), date.year())
}

/// Compose a due date from the reference month and a setting's due day.
/// Deliberately no rollover validation: due_day 31 in a 30-day month is
/// passed through as-is and rejected later by the store, matching the
/// billing rules this service implements.
pub fn due_date_string(reference_month: NaiveDate, due_day: i32) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        reference_month.year(),
        reference_month.month(),
        due_day
    )
}

/// Whole calendar months elapsed between two dates (floor).
pub fn elapsed_whole_months(from: NaiveDate, to: NaiveDate) -> i64 {
    if to < from {
        return 0;
    }
    let mut months =
        i64::from(to.year() - from.year()) * 12 + i64::from(to.month()) - i64::from(from.month());
    if to.day() < from.day() {
        months -= 1;
    }
    months.max(0)
}

/// Whole calendar years elapsed between two dates (floor). Used for both
/// member age and membership tenure.
pub fn elapsed_whole_years(from: NaiveDate, to: NaiveDate) -> i32 {
    if to < from {
        return 0;
    }
    let mut years = to.year() - from.year();
    if (to.month(), to.day()) < (from.month(), from.day()) {
        years -= 1;
    }
    years.max(0)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        due_date_string, elapsed_whole_months, elapsed_whole_years, format_month_reference,
        parse_date, parse_reference_month,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_exact_dates_only() {
        assert_eq!(parse_date("2026-03-05").unwrap(), date(2026, 3, 5));
        assert!(parse_date("05/03/2026").is_err());
        assert!(parse_date("2026-02-30").is_err());
    }

    #[test]
    fn normalizes_reference_months_to_first_day() {
        assert_eq!(parse_reference_month("2026-03").unwrap(), date(2026, 3, 1));
        assert_eq!(
            parse_reference_month("2026-03-17").unwrap(),
            date(2026, 3, 1)
        );
        assert!(parse_reference_month("march 2026").is_err());
    }

    #[test]
    fn formats_month_reference() {
        assert_eq!(format_month_reference(date(2026, 3, 1)), "03/2026");
        assert_eq!(format_month_reference(date(2026, 11, 1)), "11/2026");
    }

    #[test]
    fn due_date_skips_rollover_validation() {
        // Day 31 in a 30-day month is passed through untouched.
        assert_eq!(due_date_string(date(2026, 6, 1), 31), "2026-06-31");
        assert_eq!(due_date_string(date(2026, 2, 1), 10), "2026-02-10");
    }

    #[test]
    fn counts_whole_months() {
        assert_eq!(elapsed_whole_months(date(2024, 1, 15), date(2026, 1, 15)), 24);
        assert_eq!(elapsed_whole_months(date(2024, 1, 15), date(2026, 1, 14)), 23);
        assert_eq!(elapsed_whole_months(date(2026, 5, 1), date(2026, 4, 1)), 0);
    }

    #[test]
    fn counts_whole_years_with_calendar_floor() {
        assert_eq!(elapsed_whole_years(date(1996, 8, 31), date(2026, 8, 31)), 30);
        assert_eq!(elapsed_whole_years(date(1996, 9, 1), date(2026, 8, 31)), 29);
        // Feb 29 birthdays only complete a year on Mar 1 in common years.
        assert_eq!(elapsed_whole_years(date(2000, 2, 29), date(2026, 2, 28)), 25);
        assert_eq!(elapsed_whole_years(date(2000, 2, 29), date(2026, 3, 1)), 26);
    }
}
