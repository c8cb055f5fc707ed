//! Preset date ranges and their comparison periods.
//!
//! All ranges are whole calendar days (midnight-normalized). Comparison
//! ranges are shifted back a whole number of weeks so the start weekday is
//! preserved and span exactly as many days as the range they compare to.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DateRangeType {
    Week,
    Month,
    Quarter,
    Year,
    FiscalYear,
    Last52Weeks,
    YearToDate,
}

impl DateRangeType {
    pub const ALL: [DateRangeType; 7] = [
        DateRangeType::Week,
        DateRangeType::Month,
        DateRangeType::Quarter,
        DateRangeType::Year,
        DateRangeType::FiscalYear,
        DateRangeType::Last52Weeks,
        DateRangeType::YearToDate,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DateRangeType::Week => "Last week",
            DateRangeType::Month => "Last month",
            DateRangeType::Quarter => "Last quarter",
            DateRangeType::Year => "Last year",
            DateRangeType::FiscalYear => "Last fiscal year",
            DateRangeType::Last52Weeks => "Last 52 weeks",
            DateRangeType::YearToDate => "Year to date",
        }
    }
}

/// An inclusive day range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn length_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn start_datetime(&self) -> NaiveDateTime {
        self.start.and_hms_opt(0, 0, 0).unwrap_or_default()
    }

    /// End of range as an inclusive timestamp (last millisecond of the day).
    pub fn end_datetime(&self) -> NaiveDateTime {
        self.end.and_hms_milli_opt(23, 59, 59, 999).unwrap_or_default()
    }

    /// `YYYY-MM-DD_YYYY-MM-DD`, used in temp file names.
    pub fn slug(&self) -> String {
        format!("{}_{}", self.start, self.end)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRangeWithComparison {
    pub range_type: DateRangeType,
    pub range: DateRange,
    pub comparison: DateRange,
}

/// Start of the week containing `date`, with weeks starting on Sunday.
fn start_of_week(date: NaiveDate) -> NaiveDate {
    let days_since_sunday = date.weekday().num_days_from_sunday() as i64;
    date - Duration::days(days_since_sunday)
}

fn start_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn start_of_quarter(date: NaiveDate) -> NaiveDate {
    let quarter_month = ((date.month() - 1) / 3) * 3 + 1;
    NaiveDate::from_ymd_opt(date.year(), quarter_month, 1).unwrap_or(date)
}

fn start_of_year(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
}

fn end_of_quarter(date: NaiveDate) -> NaiveDate {
    let quarter_month = ((date.month() - 1) / 3 + 1) * 3;
    let first_of_last = NaiveDate::from_ymd_opt(date.year(), quarter_month, 1).unwrap_or(date);
    crate::utils::last_day_of_month(first_of_last)
}

/// The previous full period (week/month/quarter/year) as seen from `from`.
fn period_range(range_type: DateRangeType, from: NaiveDate) -> DateRange {
    match range_type {
        DateRangeType::Week => {
            let end = start_of_week(from) - Duration::days(1);
            DateRange { start: start_of_week(end), end }
        }
        DateRangeType::Month => {
            let end = start_of_month(from) - Duration::days(1);
            DateRange { start: start_of_month(end), end }
        }
        DateRangeType::Quarter => {
            let end = start_of_quarter(from) - Duration::days(1);
            DateRange { start: start_of_quarter(end), end }
        }
        _ => {
            let end = start_of_year(from) - Duration::days(1);
            DateRange { start: start_of_year(end), end }
        }
    }
}

fn fiscal_year_range(from: NaiveDate) -> DateRange {
    // Fiscal year ends March 31; before that date, the last completed fiscal
    // year ended the previous March.
    let mut end = NaiveDate::from_ymd_opt(from.year(), 3, 31).unwrap_or(from);
    if end > from {
        end = NaiveDate::from_ymd_opt(from.year() - 1, 3, 31).unwrap_or(from);
    }
    let start = NaiveDate::from_ymd_opt(end.year() - 1, 4, 1).unwrap_or(end);
    DateRange { start, end }
}

fn last_52_weeks_range(from: NaiveDate) -> DateRange {
    let end = start_of_week(from) - Duration::days(1);
    let start = start_of_week(end) - Duration::weeks(51);
    DateRange { start, end }
}

fn year_to_date_range(from: NaiveDate) -> DateRange {
    let end = from - Duration::days(1);
    DateRange { start: start_of_year(end), end }
}

/// 13-weeks-back quarter comparison with the weekday-alignment safeguard: an
/// extra week is subtracted when the naive result lands a week or more after
/// the current range start, or inside the ±7-day band around it (the signed
/// distance to the end of its own quarter is always under the 90-day
/// threshold there).
fn quarter_comparison_date(from: NaiveDate) -> NaiveDate {
    let current_start = period_range(DateRangeType::Quarter, from).start;
    let naive = from - Duration::weeks(13);

    let near_start =
        naive >= current_start - Duration::days(7) && naive <= current_start + Duration::days(7);
    let days_to_quarter_end = (naive - end_of_quarter(naive)).num_days();

    if naive >= current_start + Duration::days(7) || (near_start && days_to_quarter_end < 90) {
        naive - Duration::weeks(1)
    } else {
        naive
    }
}

fn comparison_range(range_type: DateRangeType, range: DateRange) -> DateRange {
    if range_type == DateRangeType::Quarter {
        let start = quarter_comparison_date(range.start);
        return DateRange { start, end: start + (range.end - range.start) };
    }

    let weeks = match range_type {
        DateRangeType::Week => 1,
        DateRangeType::Month => 4,
        _ => 52,
    };
    DateRange {
        start: range.start - Duration::weeks(weeks),
        end: range.end - Duration::weeks(weeks),
    }
}

fn range_for(range_type: DateRangeType, from: NaiveDate) -> DateRange {
    match range_type {
        DateRangeType::Week
        | DateRangeType::Month
        | DateRangeType::Quarter
        | DateRangeType::Year => period_range(range_type, from),
        DateRangeType::FiscalYear => fiscal_year_range(from),
        DateRangeType::Last52Weeks => last_52_weeks_range(from),
        DateRangeType::YearToDate => year_to_date_range(from),
    }
}

/// All seven preset ranges with comparisons, as seen from `from`.
pub fn date_ranges_with_comparisons(from: NaiveDate) -> Vec<DateRangeWithComparison> {
    DateRangeType::ALL
        .iter()
        .map(|&range_type| {
            let range = range_for(range_type, from);
            DateRangeWithComparison {
                range_type,
                range,
                comparison: comparison_range(range_type, range),
            }
        })
        .collect()
}

/// The overall min/max day across the primary ranges.
pub fn date_ranges_min_max(ranges: &[DateRangeWithComparison]) -> DateRange {
    let mut min = ranges[0].range.start;
    let mut max = ranges[0].range.end;
    for r in ranges {
        min = min.min(r.range.start);
        max = max.max(r.range.end);
    }
    DateRange { start: min, end: max }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn week_range_is_previous_sunday_to_saturday() {
        // 2025-10-02 is a Thursday
        let r = range_for(DateRangeType::Week, day(2025, 10, 2));
        assert_eq!(r.start, day(2025, 9, 21));
        assert_eq!(r.end, day(2025, 9, 27));
        assert_eq!(r.start.weekday(), Weekday::Sun);
        assert_eq!(r.end.weekday(), Weekday::Sat);
    }

    #[test]
    fn month_range_is_previous_full_month() {
        let r = range_for(DateRangeType::Month, day(2025, 10, 2));
        assert_eq!(r.start, day(2025, 9, 1));
        assert_eq!(r.end, day(2025, 9, 30));
    }

    #[test]
    fn quarter_range_and_comparison_on_2025_10_02() {
        let r = range_for(DateRangeType::Quarter, day(2025, 10, 2));
        assert_eq!(r.start, day(2025, 7, 1));
        assert_eq!(r.end, day(2025, 9, 30));

        // 13 weeks back lands in the band around the current range start, so
        // the safeguard shifts the comparison a further week (14 total).
        let cmp = comparison_range(DateRangeType::Quarter, r);
        assert_eq!(cmp.start, day(2025, 3, 25));
        assert_eq!(cmp.end, day(2025, 6, 24));
        assert_eq!(cmp.start.weekday(), r.start.weekday());
        assert_eq!(cmp.start.weekday(), Weekday::Tue);
        assert_eq!(cmp.length_days(), r.length_days());
    }

    #[test]
    fn fiscal_year_is_april_through_march() {
        let r = range_for(DateRangeType::FiscalYear, day(2025, 10, 2));
        assert_eq!(r.start, day(2024, 4, 1));
        assert_eq!(r.end, day(2025, 3, 31));

        // Before March 31 the previous completed fiscal year applies.
        let r = range_for(DateRangeType::FiscalYear, day(2025, 2, 1));
        assert_eq!(r.start, day(2023, 4, 1));
        assert_eq!(r.end, day(2024, 3, 31));
    }

    #[test]
    fn last_52_weeks_is_364_days_ending_saturday() {
        let r = range_for(DateRangeType::Last52Weeks, day(2025, 10, 2));
        assert_eq!(r.end.weekday(), Weekday::Sat);
        assert_eq!(r.length_days(), 364);
    }

    #[test]
    fn year_to_date_ends_yesterday() {
        let r = range_for(DateRangeType::YearToDate, day(2025, 10, 2));
        assert_eq!(r.start, day(2025, 1, 1));
        assert_eq!(r.end, day(2025, 10, 1));
    }

    #[test]
    fn comparison_invariants_hold_for_all_presets() {
        let today = day(2025, 10, 2);
        for dr in date_ranges_with_comparisons(today) {
            assert_eq!(
                dr.comparison.length_days(),
                dr.range.length_days(),
                "{:?} length",
                dr.range_type
            );
            assert_eq!(
                dr.comparison.start.weekday(),
                dr.range.start.weekday(),
                "{:?} weekday",
                dr.range_type
            );
            assert!(dr.range.end < today, "{:?} range before today", dr.range_type);
            assert!(dr.comparison.end < today, "{:?} comparison before today", dr.range_type);
        }
    }

    #[test]
    fn min_max_spans_every_primary_range() {
        let ranges = date_ranges_with_comparisons(day(2025, 10, 2));
        let overall = date_ranges_min_max(&ranges);
        assert!(ranges
            .iter()
            .all(|r| overall.start <= r.range.start && overall.end >= r.range.end));
        // Comparison periods may reach further back; they don't widen the bounds.
        assert!(ranges.iter().any(|r| r.comparison.start < overall.start));
    }

    #[test]
    fn slug_formatting() {
        let r = DateRange { start: day(2025, 7, 1), end: day(2025, 9, 30) };
        assert_eq!(r.slug(), "2025-07-01_2025-09-30");
    }
}
