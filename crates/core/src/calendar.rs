//! Trading-calendar day arithmetic.
//!
//! DTE and DIT are measured in trading days. Hosts with an exchange
//! calendar implement [`TradingCalendar`] themselves; [`WeekdayCalendar`]
//! covers the common Monday-Friday-minus-holidays case.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

pub trait TradingCalendar {
    fn is_trading_day(&self, date: NaiveDate) -> bool;

    /// Number of trading days in `(from, to]`. Negative when `to` is before `from`.
    fn trading_days_between(&self, from: NaiveDate, to: NaiveDate) -> i64 {
        if to < from {
            return -self.trading_days_between(to, from);
        }
        let mut count = 0;
        let mut day = from;
        while day < to {
            day += Duration::days(1);
            if self.is_trading_day(day) {
                count += 1;
            }
        }
        count
    }

    /// Latest trading day on or before `date`.
    fn last_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date;
        // A calendar with no trading days at all would loop forever.
        for _ in 0..366 {
            if self.is_trading_day(day) {
                return day;
            }
            day -= Duration::days(1);
        }
        date
    }
}

/// Monday to Friday, minus an explicit holiday list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeekdayCalendar {
    #[serde(default)]
    holidays: BTreeSet<NaiveDate>,
}

impl WeekdayCalendar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_holidays(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }
}

impl TradingCalendar for WeekdayCalendar {
    fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }
}
