//! Exchange-day bucket mapping.
//!
//! - Every bucket start is the UTC instant of an exchange-local midnight.
//! - Day: the instant's exchange date.
//! - Week: Monday-labelled. Saturday belongs to the week that just ended, Sunday
//!   to the week that starts the next morning (a Sunday maps *forward*).
//! - Month: labelled by its first trading day (day 1, pushed past Saturday/Sunday).
//!
//! Holidays are not modelled; provider data already omits them.
//! Pure and deterministic: no I/O, no clock.

use std::fmt;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{error::CacheError, interval::Interval, tz};

/// Inclusive range of daily bucket starts `[first, last]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DayRange {
    /// First daily bucket (inclusive).
    pub first: DateTime<Utc>,
    /// Last daily bucket (inclusive).
    pub last: DateTime<Utc>,
}

impl DayRange {
    /// Returns `None` when `first > last`.
    pub fn new(first: DateTime<Utc>, last: DateTime<Utc>) -> Option<Self> {
        (first <= last).then_some(Self { first, last })
    }

    /// A range holding exactly one day.
    pub fn single(day: DateTime<Utc>) -> Self {
        Self {
            first: day,
            last: day,
        }
    }

    /// Whether `bucket` lies inside the range.
    pub fn contains(&self, bucket: DateTime<Utc>) -> bool {
        self.first <= bucket && bucket <= self.last
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn covers(&self, other: &DayRange) -> bool {
        self.first <= other.first && other.last <= self.last
    }

    /// Overlapping part of the two ranges, if any.
    pub fn intersect(&self, other: &DayRange) -> Option<DayRange> {
        DayRange::new(self.first.max(other.first), self.last.min(other.last))
    }
}

impl fmt::Display for DayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            tz::to_rfc3339_millis(self.first),
            tz::to_rfc3339_millis(self.last)
        )
    }
}

/// Weekday-only trading calendar for one exchange time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingCalendar {
    tz: Tz,
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl TradingCalendar {
    /// Calendar whose days start at exchange-local midnight in `tz`.
    pub const fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Calendar on UTC days.
    pub const fn utc() -> Self {
        Self { tz: Tz::UTC }
    }

    /// Exchange time zone.
    pub const fn tz(&self) -> Tz {
        self.tz
    }

    /// Exchange-local date of `instant`.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// UTC instant at which exchange-local `date` begins.
    pub fn date_start(&self, date: NaiveDate) -> DateTime<Utc> {
        tz::local_midnight_utc(date, self.tz)
    }

    /// Daily bucket containing `instant`.
    pub fn day_start(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        self.date_start(self.local_date(instant))
    }

    /// Daily bucket after the one containing `instant`.
    pub fn next_day(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        self.date_start(self.local_date(instant) + Days::new(1))
    }

    /// Daily bucket before the one containing `instant`.
    pub fn prev_day(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        self.date_start(self.local_date(instant) - Days::new(1))
    }

    /// Canonical bucket start for `instant` at `interval`.
    pub fn bucket_start(&self, instant: DateTime<Utc>, interval: Interval) -> DateTime<Utc> {
        self.date_start(bucket_date(self.local_date(instant), interval))
    }

    /// First and last trading days of the bucket containing `instant`.
    ///
    /// Weeks span Monday–Friday; months span their first to last weekday.
    pub fn bucket_span(&self, instant: DateTime<Utc>, interval: Interval) -> DayRange {
        let (first, last) = span_dates(self.local_date(instant), interval);
        DayRange {
            first: self.date_start(first),
            last: self.date_start(last),
        }
    }

    /// Bucket starts from the bucket containing `from` through the bucket containing `to`.
    ///
    /// Daily enumeration yields trading days only. The iterator is `Clone`, so a
    /// caller can restart it from the same position.
    pub fn enumerate_buckets(
        &self,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BucketIter, CacheError> {
        if from > to {
            return Err(CacheError::InvalidRange { from, to });
        }
        let from_date = self.local_date(from);
        let first = match interval {
            Interval::Daily => next_weekday_on_or_after(from_date),
            _ => bucket_date(from_date, interval),
        };
        Ok(BucketIter {
            calendar: *self,
            interval,
            next: Some(first),
            last: bucket_date(self.local_date(to), interval),
        })
    }

    /// Number of trading days in `range`.
    pub fn trading_days(&self, range: DayRange) -> usize {
        self.enumerate_buckets(Interval::Daily, range.first, range.last)
            .map(|it| it.count())
            .unwrap_or(0)
    }
}

/// Iterator over bucket starts; see [`TradingCalendar::enumerate_buckets`].
#[derive(Debug, Clone)]
pub struct BucketIter {
    calendar: TradingCalendar,
    interval: Interval,
    next: Option<NaiveDate>,
    last: NaiveDate,
}

impl Iterator for BucketIter {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.filter(|d| *d <= self.last)?;
        self.next = Some(following_bucket_date(current, self.interval));
        Some(self.calendar.date_start(current))
    }
}

// ----- date-level internals -----

/// Saturday or Sunday.
pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Bucket label date for the bucket containing `date`.
pub fn bucket_date(date: NaiveDate, interval: Interval) -> NaiveDate {
    match interval {
        Interval::Daily => date,
        Interval::Weekly => week_monday(date),
        Interval::Monthly => first_trading_day_of_month(date),
    }
}

fn week_monday(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        // forward, never back six days
        Weekday::Sun => date + Days::new(1),
        wd => date - Days::new(u64::from(wd.num_days_from_monday())),
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

/// First weekday of `date`'s calendar month.
pub fn first_trading_day_of_month(date: NaiveDate) -> NaiveDate {
    next_weekday_on_or_after(first_of_month(date))
}

/// Last weekday of `date`'s calendar month.
pub fn last_trading_day_of_month(date: NaiveDate) -> NaiveDate {
    let mut d = first_of_month(date) + Months::new(1) - Days::new(1);
    while is_weekend(d) {
        d = d - Days::new(1);
    }
    d
}

fn next_weekday_on_or_after(date: NaiveDate) -> NaiveDate {
    let mut d = date;
    while is_weekend(d) {
        d = d + Days::new(1);
    }
    d
}

fn span_dates(date: NaiveDate, interval: Interval) -> (NaiveDate, NaiveDate) {
    match interval {
        Interval::Daily => (date, date),
        Interval::Weekly => {
            let monday = week_monday(date);
            (monday, monday + Days::new(4))
        }
        Interval::Monthly => (
            first_trading_day_of_month(date),
            last_trading_day_of_month(date),
        ),
    }
}

fn following_bucket_date(current: NaiveDate, interval: Interval) -> NaiveDate {
    match interval {
        Interval::Daily => next_weekday_on_or_after(current + Days::new(1)),
        Interval::Weekly => current + Days::new(7),
        Interval::Monthly => first_trading_day_of_month(first_of_month(current) + Months::new(1)),
    }
}
