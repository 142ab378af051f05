//! Calendar and seasonality features derived from the session date.
//!
//! Covers day-of-week and week-of-month one-hots, the options-expiration
//! week, quarter/year flags, distance to US market holidays and the four
//! quarterly earnings windows.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Day offset cap when measuring distance to market holidays.
pub const HOLIDAY_DISTANCE_CAP: i64 = 10;

/// Day offset cap when measuring distance to earnings windows.
pub const EARNINGS_DISTANCE_CAP: i64 = 30;

/// Length of each quarterly earnings window in days.
const EARNINGS_WINDOW_DAYS: i64 = 21;

/// US market holidays for `year` (fixed calendar; observed-date shifts are
/// not modeled).
pub fn market_holidays(year: i32) -> Vec<NaiveDate> {
    let mut days = Vec::with_capacity(9);
    if let Some(d) = NaiveDate::from_ymd_opt(year, 1, 1) {
        days.push(d);
    }
    days.push(nth_weekday(year, 1, Weekday::Mon, 3)); // Martin Luther King Jr. Day
    days.push(nth_weekday(year, 2, Weekday::Mon, 3)); // Presidents' Day
    days.push(last_weekday(year, 5, Weekday::Mon)); // Memorial Day
    if let Some(d) = NaiveDate::from_ymd_opt(year, 6, 19) {
        days.push(d);
    }
    if let Some(d) = NaiveDate::from_ymd_opt(year, 7, 4) {
        days.push(d);
    }
    days.push(nth_weekday(year, 9, Weekday::Mon, 1)); // Labor Day
    days.push(nth_weekday(year, 11, Weekday::Thu, 4)); // Thanksgiving
    if let Some(d) = NaiveDate::from_ymd_opt(year, 12, 25) {
        days.push(d);
    }
    days.sort();
    days
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> NaiveDate {
    let mut count = 0;
    let mut day = 1;
    loop {
        // The nth weekday of a month always exists for n <= 4.
        let date = NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default();
        if date.weekday() == weekday {
            count += 1;
            if count == n {
                return date;
            }
        }
        day += 1;
    }
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let mut day = days_in_month(year, month);
    loop {
        let date = NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default();
        if date.weekday() == weekday {
            return date;
        }
        day -= 1;
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (next, NaiveDate::from_ymd_opt(year, month, 1)) {
        (Some(next), Some(first)) => (next - first).num_days() as u32,
        _ => 30,
    }
}

/// Days since the nearest preceding market holiday, capped.
pub fn days_from_holiday(date: NaiveDate) -> f64 {
    let mut best = HOLIDAY_DISTANCE_CAP;
    for year in [date.year() - 1, date.year()] {
        for holiday in market_holidays(year) {
            if holiday <= date {
                best = best.min((date - holiday).num_days());
            }
        }
    }
    best as f64
}

/// Days until the nearest following market holiday, capped.
pub fn days_to_holiday(date: NaiveDate) -> f64 {
    let mut best = HOLIDAY_DISTANCE_CAP;
    for year in [date.year(), date.year() + 1] {
        for holiday in market_holidays(year) {
            if holiday >= date {
                best = best.min((holiday - date).num_days());
            }
        }
    }
    best as f64
}

/// Third Friday of the month.
pub fn third_friday(year: i32, month: u32) -> NaiveDate {
    nth_weekday(year, month, Weekday::Fri, 3)
}

/// Whether `date` falls in the calendar week (ISO) containing the month's
/// third Friday.
pub fn is_opex_week(date: NaiveDate) -> bool {
    date.iso_week() == third_friday(date.year(), date.month()).iso_week()
}

/// Week of month bucket: 1..=4, with the 4th bucket covering everything
/// from day 22 on.
pub fn week_of_month(date: NaiveDate) -> usize {
    (((date.day() - 1) / 7) as usize + 1).min(4)
}

/// Start date of the earnings window for each quarter of `year`.
fn earnings_window_starts(year: i32) -> Vec<NaiveDate> {
    [1u32, 4, 7, 10]
        .iter()
        .filter_map(|&m| NaiveDate::from_ymd_opt(year, m, 15))
        .collect()
}

/// Whether `date` falls inside one of the four quarterly earnings windows.
pub fn in_earnings_season(date: NaiveDate) -> bool {
    earnings_window_starts(date.year()).iter().any(|&start| {
        date >= start && date < start + Duration::days(EARNINGS_WINDOW_DAYS)
    })
}

/// Day distance to the nearest earnings window edge, 0 inside a window,
/// capped.
pub fn earnings_distance(date: NaiveDate) -> f64 {
    if in_earnings_season(date) {
        return 0.0;
    }
    let mut best = EARNINGS_DISTANCE_CAP;
    for year in [date.year() - 1, date.year(), date.year() + 1] {
        for start in earnings_window_starts(year) {
            let end = start + Duration::days(EARNINGS_WINDOW_DAYS - 1);
            let dist = if date < start {
                (start - date).num_days()
            } else {
                (date - end).num_days()
            };
            best = best.min(dist.abs());
        }
    }
    best as f64
}

/// Fractional progress through the month, in [0, 1].
pub fn month_progress(date: NaiveDate) -> f64 {
    let len = days_in_month(date.year(), date.month()) as f64;
    (date.day() as f64 - 1.0) / (len - 1.0).max(1.0)
}

/// Fractional progress through the quarter, in [0, 1].
pub fn quarter_progress(date: NaiveDate) -> f64 {
    let q_start_month = (date.month0() / 3) * 3 + 1;
    let start = NaiveDate::from_ymd_opt(date.year(), q_start_month, 1).unwrap_or(date);
    let end_month = q_start_month + 2;
    let end_day = days_in_month(date.year(), end_month);
    let end = NaiveDate::from_ymd_opt(date.year(), end_month, end_day).unwrap_or(date);
    let span = (end - start).num_days().max(1) as f64;
    ((date - start).num_days() as f64 / span).clamp(0.0, 1.0)
}

/// Fractional progress through the year, in [0, 1].
pub fn year_progress(date: NaiveDate) -> f64 {
    let days = if is_leap_year(date.year()) { 366.0 } else { 365.0 };
    (date.ordinal() as f64 - 1.0) / (days - 1.0)
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Whether `date` lies in the first week of a quarter month.
pub fn is_quarter_start(date: NaiveDate) -> bool {
    matches!(date.month(), 1 | 4 | 7 | 10) && date.day() <= 7
}

/// Whether `date` lies in the last week of a quarter-end month.
pub fn is_quarter_end(date: NaiveDate) -> bool {
    matches!(date.month(), 3 | 6 | 9 | 12)
        && date.day() > days_in_month(date.year(), date.month()) - 7
}

/// Whether `date` lies in the year-end stretch (December 21 onwards).
pub fn is_year_end(date: NaiveDate) -> bool {
    date.month() == 12 && date.day() >= 21
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn day_after_independence_day() {
        // 2024-07-05 is one day past July 4 and far from the next holiday.
        let date = d("2024-07-05");
        assert_eq!(days_from_holiday(date), 1.0);
        assert_eq!(days_to_holiday(date), HOLIDAY_DISTANCE_CAP as f64);
    }

    #[test]
    fn holiday_itself_is_distance_zero() {
        let date = d("2024-12-25");
        assert_eq!(days_from_holiday(date), 0.0);
        assert_eq!(days_to_holiday(date), 0.0);
    }

    #[test]
    fn opex_week_contains_third_friday() {
        // Third Friday of June 2024 is the 21st.
        assert_eq!(third_friday(2024, 6), d("2024-06-21"));
        assert!(is_opex_week(d("2024-06-17"))); // Monday of that week
        assert!(!is_opex_week(d("2024-06-10")));
    }

    #[test]
    fn week_of_month_buckets() {
        assert_eq!(week_of_month(d("2024-03-01")), 1);
        assert_eq!(week_of_month(d("2024-03-08")), 2);
        assert_eq!(week_of_month(d("2024-03-22")), 4);
        assert_eq!(week_of_month(d("2024-03-29")), 4); // 4th-or-later
    }

    #[test]
    fn earnings_windows() {
        assert!(in_earnings_season(d("2024-01-20")));
        assert!(!in_earnings_season(d("2024-03-01")));
        assert_eq!(earnings_distance(d("2024-01-20")), 0.0);
        // 2024-02-05 is one day past the January window (ends Feb 4).
        assert_eq!(earnings_distance(d("2024-02-05")), 1.0);
        // Mid-March is more than 30 days from both windows' edges? It is 31
        // days before Apr 15, so the cap applies.
        assert_eq!(earnings_distance(d("2024-03-15")), 30.0);
    }

    #[test]
    fn progress_fractions_bounded() {
        for date in ["2024-01-01", "2024-06-15", "2024-12-31"] {
            let date = d(date);
            for v in [month_progress(date), quarter_progress(date), year_progress(date)] {
                assert!((0.0..=1.0).contains(&v));
            }
        }
        assert_eq!(year_progress(d("2024-01-01")), 0.0);
        assert_eq!(year_progress(d("2024-12-31")), 1.0);
    }

    #[test]
    fn quarter_flags() {
        assert!(is_quarter_start(d("2024-04-03")));
        assert!(!is_quarter_start(d("2024-04-12")));
        assert!(is_quarter_end(d("2024-03-27")));
        assert!(is_year_end(d("2024-12-24")));
    }
}
