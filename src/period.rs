//! Monthly periods for sources fetched one calendar month at a time.
//!
//! A [`PeriodRange`] is validated up front and then yields half-open
//! `[start, end)` months lazily. The range never reaches into the current
//! month: upstream data for it is still accumulating and must not be cached
//! as if it were final.

use chrono::{Datelike, Months, NaiveDate};
use std::fmt;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    /// The month beginning at `start`. `start` must be the first of a month.
    pub fn starting(start: NaiveDate) -> Option<Self> {
        if start.day() != 1 {
            return None;
        }
        let end = start.checked_add_months(Months::new(1))?;
        Some(Self { start, end })
    }

    /// `YYYY-MM` key used in fingerprints, directory names and stored rows.
    pub fn key(&self) -> String {
        self.start.format("%Y-%m").to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First day of the most recent month that has fully ended before `today`.
pub fn last_completed_month(today: NaiveDate) -> NaiveDate {
    let this_month = first_of_month(today);
    this_month
        .checked_sub_months(Months::new(1))
        .unwrap_or(this_month)
}

/// Inclusive range of months `[first, last]`, validated against `today`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodRange {
    first: NaiveDate,
    last: NaiveDate,
}

impl PeriodRange {
    /// Validate `start`/`end` months. `end` defaults to the last completed
    /// month; an explicit `end` before `start` or after the last completed
    /// month is a configuration error.
    pub fn new(start: NaiveDate, end: Option<NaiveDate>, today: NaiveDate) -> EngineResult<Self> {
        let first = first_of_month(start);
        let ceiling = last_completed_month(today);

        let last = match end {
            None => {
                if first > ceiling {
                    return Err(EngineError::config(format!(
                        "start-period {} is not before the current month",
                        first.format("%Y-%m")
                    )));
                }
                ceiling
            }
            Some(end) => {
                let end = first_of_month(end);
                if end < first {
                    return Err(EngineError::config(format!(
                        "start-period {} must not be after end-period {}",
                        first.format("%Y-%m"),
                        end.format("%Y-%m")
                    )));
                }
                if end > ceiling {
                    return Err(EngineError::config(format!(
                        "end-period {} must be before the current month ({})",
                        end.format("%Y-%m"),
                        first_of_month(today).format("%Y-%m")
                    )));
                }
                end
            }
        };

        Ok(Self { first, last })
    }

    pub fn first(&self) -> NaiveDate {
        self.first
    }

    pub fn last(&self) -> NaiveDate {
        self.last
    }

    pub fn len(&self) -> usize {
        let months = (self.last.year() - self.first.year()) * 12
            + self.last.month() as i32
            - self.first.month() as i32;
        months as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// A fresh iterator over the range. Calling it again restarts.
    pub fn iter(&self) -> Periods {
        Periods {
            next: Some(self.first),
            last: self.last,
        }
    }
}

impl IntoIterator for &PeriodRange {
    type Item = Period;
    type IntoIter = Periods;

    fn into_iter(self) -> Periods {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct Periods {
    next: Option<NaiveDate>,
    last: NaiveDate,
}

impl Iterator for Periods {
    type Item = Period;

    fn next(&mut self) -> Option<Period> {
        let start = self.next.filter(|s| *s <= self.last)?;
        let period = Period::starting(start)?;
        self.next = Some(period.end);
        Some(period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn three_monthly_periods() {
        let range = PeriodRange::new(ymd(2010, 1, 1), Some(ymd(2010, 3, 1)), ymd(2026, 10, 16))
            .unwrap();
        let periods: Vec<Period> = range.iter().collect();
        assert_eq!(periods.len(), 3);
        assert_eq!(range.len(), 3);
        assert_eq!(
            periods.iter().map(Period::key).collect::<Vec<_>>(),
            vec!["2010-01", "2010-02", "2010-03"]
        );
        assert_eq!(periods[0].start, ymd(2010, 1, 1));
        assert_eq!(periods[0].end, ymd(2010, 2, 1));
        assert_eq!(periods[2].start, ymd(2010, 3, 1));
        assert_eq!(periods[2].end, ymd(2010, 4, 1));
    }

    #[test]
    fn crosses_year_boundary() {
        let range = PeriodRange::new(ymd(2013, 11, 1), Some(ymd(2014, 2, 1)), ymd(2020, 1, 1))
            .unwrap();
        let keys: Vec<String> = range.iter().map(|p| p.key()).collect();
        assert_eq!(keys, vec!["2013-11", "2013-12", "2014-01", "2014-02"]);
        assert_eq!(range.len(), 4);
    }

    #[test]
    fn default_end_is_last_completed_month() {
        let today = ymd(2026, 10, 16);
        let range = PeriodRange::new(ymd(2026, 6, 1), None, today).unwrap();
        let last = range.iter().last().unwrap();
        assert_eq!(last.key(), "2026-09");
        assert_eq!(last.end, ymd(2026, 10, 1));
    }

    #[test]
    fn january_clamps_to_previous_december() {
        assert_eq!(last_completed_month(ymd(2015, 1, 31)), ymd(2014, 12, 1));
    }

    #[test]
    fn current_month_is_rejected() {
        let today = ymd(2026, 10, 16);
        let err = PeriodRange::new(ymd(2026, 1, 1), Some(ymd(2026, 10, 1)), today).unwrap_err();
        assert!(err.is_user_error());
        assert!(PeriodRange::new(ymd(2026, 1, 1), Some(ymd(2027, 1, 1)), today).is_err());
    }

    #[test]
    fn end_before_start_is_rejected() {
        let err = PeriodRange::new(ymd(2012, 5, 1), Some(ymd(2012, 4, 1)), ymd(2020, 1, 1))
            .unwrap_err();
        assert!(err.to_string().contains("must not be after"));
    }

    #[test]
    fn iteration_restarts() {
        let range = PeriodRange::new(ymd(2010, 1, 1), Some(ymd(2010, 2, 1)), ymd(2020, 1, 1))
            .unwrap();
        let mut first = range.iter();
        first.next();
        assert_eq!(range.iter().count(), 2);
        assert_eq!(first.count(), 1);
    }
}
