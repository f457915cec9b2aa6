use chrono::{DateTime, Datelike, Days, NaiveDate, TimeZone, Utc};
use serde::Serialize;

/// A Monday-to-Sunday calendar week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Week {
    start: NaiveDate,
}

impl Week {
    /// The week that contains `date`.
    pub fn containing(date: NaiveDate) -> Self {
        let offset = u64::from(date.weekday().num_days_from_monday());
        Week {
            start: date - Days::new(offset),
        }
    }

    /// The week that contains `now` as seen on a wall clock in `tz`.
    pub fn current<Tz: TimeZone>(tz: &Tz, now: DateTime<Utc>) -> Self {
        Self::containing(now.with_timezone(tz).date_naive())
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// The Sunday closing the week, inclusive.
    pub fn end(&self) -> NaiveDate {
        self.start + Days::new(6)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        (self.start..=self.end()).contains(&date)
    }

    pub fn days(&self) -> [NaiveDate; 7] {
        std::array::from_fn(|offset| self.start + Days::new(offset as u64))
    }
}

impl std::fmt::Display for Week {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.start, self.end())
    }
}
