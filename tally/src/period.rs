//! Calendar-month billing periods.
//!
//! All period math happens in UTC so that horizontally-scaled callers agree
//! on the same window regardless of where the request landed.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The window bounding one monthly allowance: first and last calendar day of
/// a single month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
}

impl BillingPeriod {
    /// The period containing `now`. Pure function of the UTC calendar month;
    /// no failure mode.
    pub fn containing(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let (year, month) = (today.year(), today.month());
        let starts_on =
            NaiveDate::from_ymd_opt(year, month, 1).expect("day 1 exists in every month");
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let ends_on = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .expect("day 1 exists in every month")
            .pred_opt()
            .expect("the day before the 1st exists");
        Self { starts_on, ends_on }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.starts_on <= date && date <= self.ends_on
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.starts_on, self.ends_on)
    }
}
