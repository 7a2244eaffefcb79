//! Billing period calculation around fixed anchor days.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// The fixed day-of-month that defines a subscription's recurring billing
/// boundary. Only the 15th and 30th are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorDay {
    Fifteenth,
    Thirtieth,
}

impl AnchorDay {
    pub fn from_day(day: i32) -> Option<Self> {
        match day {
            15 => Some(AnchorDay::Fifteenth),
            30 => Some(AnchorDay::Thirtieth),
            _ => None,
        }
    }

    pub fn day(&self) -> u32 {
        match self {
            AnchorDay::Fifteenth => 15,
            AnchorDay::Thirtieth => 30,
        }
    }
}

/// A half-open billing window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingPeriod {
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("first of month is always valid")
        - Duration::days(1)
}

/// The anchor boundary within a given month. A 30th anchor clamps to the
/// last calendar day of months shorter than 30 days.
fn anchor_date(year: i32, month: u32, anchor: AnchorDay) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, anchor.day())
        .unwrap_or_else(|| last_day_of_month(year, month))
}

fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// Compute the billing period containing `reference`.
///
/// If the reference day-of-month is before the anchor boundary, the period
/// ends at the boundary in the reference month; otherwise (on or after the
/// boundary) it ends at the boundary of the following month.
pub fn current_period(anchor: AnchorDay, reference: NaiveDate) -> BillingPeriod {
    let boundary = anchor_date(reference.year(), reference.month(), anchor);

    if reference < boundary {
        let (sy, sm) = prev_month(reference.year(), reference.month());
        BillingPeriod {
            start: anchor_date(sy, sm, anchor),
            end: boundary,
        }
    } else {
        let (ey, em) = next_month(reference.year(), reference.month());
        BillingPeriod {
            start: boundary,
            end: anchor_date(ey, em, anchor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn pre_anchor_date_ends_in_same_month() {
        let period = current_period(AnchorDay::Fifteenth, d(2026, 8, 10));
        assert_eq!(period.start, d(2026, 7, 15));
        assert_eq!(period.end, d(2026, 8, 15));
    }

    #[test]
    fn on_anchor_date_rolls_to_next_month() {
        let period = current_period(AnchorDay::Fifteenth, d(2026, 8, 15));
        assert_eq!(period.start, d(2026, 8, 15));
        assert_eq!(period.end, d(2026, 9, 15));
    }

    #[test]
    fn post_anchor_date_ends_next_month() {
        let period = current_period(AnchorDay::Fifteenth, d(2026, 8, 20));
        assert_eq!(period.start, d(2026, 8, 15));
        assert_eq!(period.end, d(2026, 9, 15));
    }

    #[test]
    fn thirtieth_clamps_in_february() {
        let period = current_period(AnchorDay::Thirtieth, d(2026, 2, 10));
        assert_eq!(period.start, d(2026, 1, 30));
        assert_eq!(period.end, d(2026, 2, 28));
    }

    #[test]
    fn thirtieth_clamps_in_leap_february() {
        let period = current_period(AnchorDay::Thirtieth, d(2028, 2, 10));
        assert_eq!(period.end, d(2028, 2, 29));
    }

    #[test]
    fn february_clamped_boundary_rolls_forward() {
        // Feb 28 is the clamped boundary itself, so the period rolls over.
        let period = current_period(AnchorDay::Thirtieth, d(2026, 2, 28));
        assert_eq!(period.start, d(2026, 2, 28));
        assert_eq!(period.end, d(2026, 3, 30));
    }

    #[test]
    fn year_boundary_wraps() {
        let period = current_period(AnchorDay::Fifteenth, d(2026, 1, 3));
        assert_eq!(period.start, d(2025, 12, 15));
        assert_eq!(period.end, d(2026, 1, 15));

        let period = current_period(AnchorDay::Thirtieth, d(2025, 12, 31));
        assert_eq!(period.start, d(2025, 12, 30));
        assert_eq!(period.end, d(2026, 1, 30));
    }

    #[test]
    fn period_end_always_after_reference_and_at_most_a_month_later() {
        for anchor in [AnchorDay::Fifteenth, AnchorDay::Thirtieth] {
            let mut date = d(2026, 1, 1);
            while date < d(2027, 1, 1) {
                let period = current_period(anchor, date);
                assert!(period.end > date, "{:?} {}", anchor, date);
                assert!(period.start <= date, "{:?} {}", anchor, date);
                assert!((period.end - date).num_days() <= 31, "{:?} {}", anchor, date);
                date += Duration::days(1);
            }
        }
    }

    #[test]
    fn anchor_from_day_rejects_other_days() {
        assert_eq!(AnchorDay::from_day(15), Some(AnchorDay::Fifteenth));
        assert_eq!(AnchorDay::from_day(30), Some(AnchorDay::Thirtieth));
        assert_eq!(AnchorDay::from_day(1), None);
        assert_eq!(AnchorDay::from_day(31), None);
    }
}
