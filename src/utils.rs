//! Calendar partition math and small formatting helpers.

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use std::time::Duration;

/// The last day of the month containing `day`.
pub fn last_day_of_month(day: NaiveDate) -> NaiveDate {
    // The 28th exists in every month; 4 days later is always next month.
    let next_month = day.with_day(28).unwrap_or(day) + ChronoDuration::days(4);
    next_month - ChronoDuration::days(next_month.day() as i64)
}

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).unwrap_or_default()
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_milli_opt(23, 59, 59, 999).unwrap_or_default()
}

/// Inclusive month windows covering `[start, end]`. Each window runs from
/// midnight on the first of the month to the last millisecond of its last day,
/// so any timestamp inside the month falls inside exactly one window.
pub fn month_range(start: NaiveDateTime, end: NaiveDateTime) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut windows = Vec::new();
    let mut cursor = match start.date().with_day(1) {
        Some(first) => first,
        None => return windows,
    };
    let last = last_day_of_month(end.date());

    while cursor <= last {
        let month_end = last_day_of_month(cursor);
        windows.push((start_of_day(cursor), end_of_day(month_end)));
        cursor = month_end + ChronoDuration::days(1);
    }
    windows
}

/// Inclusive year windows covering `[start, end]`.
pub fn year_range(start: NaiveDateTime, end: NaiveDateTime) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut windows = Vec::new();
    for year in start.year()..=end.year() {
        let first = match NaiveDate::from_ymd_opt(year, 1, 1) {
            Some(d) => d,
            None => continue,
        };
        let last = match NaiveDate::from_ymd_opt(year, 12, 31) {
            Some(d) => d,
            None => continue,
        };
        windows.push((start_of_day(first), end_of_day(last)));
    }
    windows
}

/// Render a duration as `h:mm:ss` (sub-second durations keep milliseconds).
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    if total == 0 {
        return format!("0:00:00.{:03}", duration.subsec_millis());
    }
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}
