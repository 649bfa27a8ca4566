//! Daily → weekly/monthly folding.
//!
//! Weekly and monthly bars are never stored. They are recomputed from the
//! canonical daily series on every read, so a corrected daily bar can never
//! leave a stale derived bar behind.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    bar::Bar,
    calendar::{DayRange, TradingCalendar},
    interval::Interval,
};

/// Whether a derived bar summarises its whole bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    Complete,
    /// Bucket is still open, or not every day of it is covered.
    Partial,
}

/// What the caller knows about the input's coverage.
#[derive(Debug, Clone, Copy)]
pub struct AggregationWindow {
    /// Daily range known to be complete in the store, if any.
    pub covered: Option<DayRange>,
    /// Start of the open daily bucket; anything on or after it is still moving.
    pub open_from: DateTime<Utc>,
}

/// One output bar plus how much of its bucket it reflects.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedBar {
    pub bar: Bar,
    pub completeness: Completeness,
    /// First and last daily buckets that contributed.
    pub span: DayRange,
}

#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    calendar: TradingCalendar,
}

impl Aggregator {
    pub fn new(calendar: TradingCalendar) -> Self {
        Self { calendar }
    }

    /// Folds `daily` into `interval` buckets.
    ///
    /// Output is ascending by bucket with one bar per bucket, and does not depend
    /// on the order of `daily`. Repeated daily buckets are collapsed first.
    pub fn aggregate(
        &self,
        daily: &[Bar],
        interval: Interval,
        window: AggregationWindow,
    ) -> Vec<AggregatedBar> {
        let mut sorted: Vec<&Bar> = daily.iter().collect();
        sorted.sort_by(|a, b| {
            a.bucket_start
                .cmp(&b.bucket_start)
                .then(a.open.total_cmp(&b.open))
                .then(a.high.total_cmp(&b.high))
                .then(a.low.total_cmp(&b.low))
                .then(a.close.total_cmp(&b.close))
                .then(a.volume.total_cmp(&b.volume))
        });
        sorted.dedup_by_key(|bar| bar.bucket_start);

        if interval == Interval::Daily {
            return sorted
                .into_iter()
                .map(|bar| AggregatedBar {
                    completeness: if bar.bucket_start >= window.open_from {
                        Completeness::Partial
                    } else {
                        Completeness::Complete
                    },
                    span: DayRange::single(bar.bucket_start),
                    bar: bar.clone(),
                })
                .collect();
        }

        let mut groups: BTreeMap<DateTime<Utc>, Vec<&Bar>> = BTreeMap::new();
        for bar in sorted {
            groups
                .entry(self.calendar.bucket_start(bar.bucket_start, interval))
                .or_default()
                .push(bar);
        }

        groups
            .into_iter()
            .filter_map(|(bucket, members)| self.fold(bucket, &members, interval, window))
            .collect()
    }

    fn fold(
        &self,
        bucket: DateTime<Utc>,
        members: &[&Bar],
        interval: Interval,
        window: AggregationWindow,
    ) -> Option<AggregatedBar> {
        let first = members.first()?;
        let last = members.last()?;

        let mut high = f64::NEG_INFINITY;
        let mut low = f64::INFINITY;
        let mut volume = 0.0;
        for bar in members {
            high = high.max(bar.high);
            low = low.min(bar.low);
            volume += bar.volume;
        }

        let full = self.calendar.bucket_span(bucket, interval);
        let closed = full.last < window.open_from;
        let covered = window.covered.is_some_and(|c| c.covers(&full));

        Some(AggregatedBar {
            bar: Bar {
                symbol: first.symbol.clone(),
                bucket_start: bucket,
                open: first.open,
                high,
                low,
                close: last.close,
                volume,
            },
            completeness: if closed && covered {
                Completeness::Complete
            } else {
                Completeness::Partial
            },
            span: DayRange {
                first: first.bucket_start,
                last: last.bucket_start,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn bar(at: DateTime<Utc>, o: f64, h: f64, l: f64, c: f64, v: f64) -> Bar {
        Bar {
            symbol: "AAPL".into(),
            bucket_start: at,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
        }
    }

    fn first_week_of_sept_2025() -> Vec<Bar> {
        vec![
            bar(day(2025, 9, 1), 10.0, 11.0, 9.5, 10.5, 100.0),
            bar(day(2025, 9, 2), 10.5, 12.0, 10.0, 11.5, 120.0),
            bar(day(2025, 9, 3), 11.5, 13.5, 11.0, 13.0, 90.0),
            bar(day(2025, 9, 4), 13.0, 13.2, 8.5, 9.0, 300.0),
            bar(day(2025, 9, 5), 9.0, 10.0, 8.8, 9.8, 110.0),
        ]
    }

    fn closed_window(covered: DayRange) -> AggregationWindow {
        AggregationWindow {
            covered: Some(covered),
            open_from: day(2025, 10, 1),
        }
    }

    #[test]
    fn one_week_folds_to_one_bar() {
        let agg = Aggregator::new(TradingCalendar::utc());
        let covered = DayRange::new(day(2025, 9, 1), day(2025, 9, 5)).unwrap();
        let out = agg.aggregate(&first_week_of_sept_2025(), Interval::Weekly, closed_window(covered));

        assert_eq!(out.len(), 1);
        let w = &out[0];
        assert_eq!(w.bar.bucket_start, day(2025, 9, 1));
        assert_eq!(w.bar.open, 10.0);
        assert_eq!(w.bar.close, 9.8);
        assert_eq!(w.bar.high, 13.5);
        assert_eq!(w.bar.low, 8.5);
        assert_eq!(w.bar.volume, 720.0);
        assert_eq!(w.completeness, Completeness::Complete);
        assert_eq!(w.span, covered);
    }

    #[test]
    fn week_of_known_closes() {
        let closes = [10.0, 11.0, 9.0, 12.0, 13.0];
        let highs = [10.5, 11.5, 9.5, 12.5, 13.5];
        let lows = [9.5, 10.5, 8.5, 11.5, 12.5];
        let opens = [9.75, 10.75, 9.25, 11.75, 12.75];
        let daily: Vec<Bar> = (0..5)
            .map(|i| bar(day(2025, 9, 1 + i as u32), opens[i], highs[i], lows[i], closes[i], 100.0))
            .collect();

        let agg = Aggregator::new(TradingCalendar::utc());
        let covered = DayRange::new(day(2025, 9, 1), day(2025, 9, 5)).unwrap();
        let out = agg.aggregate(&daily, Interval::Weekly, closed_window(covered));

        assert_eq!(out.len(), 1);
        let w = &out[0].bar;
        assert_eq!(w.bucket_start, day(2025, 9, 1));
        assert_eq!(w.open, 9.75);
        assert_eq!(w.close, 13.0);
        assert_eq!(w.high, 13.5);
        assert_eq!(w.low, 8.5);
        assert_eq!(w.volume, 500.0);
        assert_eq!(out[0].completeness, Completeness::Complete);
    }

    #[test]
    fn uncovered_or_open_bucket_is_partial() {
        let agg = Aggregator::new(TradingCalendar::utc());
        let bars = first_week_of_sept_2025();

        // coverage misses Monday
        let short = DayRange::new(day(2025, 9, 2), day(2025, 9, 5)).unwrap();
        let out = agg.aggregate(&bars, Interval::Weekly, closed_window(short));
        assert_eq!(out[0].completeness, Completeness::Partial);

        // today is Thursday of that week
        let open = AggregationWindow {
            covered: DayRange::new(day(2025, 9, 1), day(2025, 9, 4)),
            open_from: day(2025, 9, 4),
        };
        let out = agg.aggregate(&bars[..4], Interval::Weekly, open);
        assert_eq!(out[0].completeness, Completeness::Partial);

        let daily = agg.aggregate(&bars[..4], Interval::Daily, open);
        assert_eq!(daily.len(), 4);
        assert_eq!(daily[3].completeness, Completeness::Partial);
        assert!(daily[..3].iter().all(|b| b.completeness == Completeness::Complete));
    }

    #[test]
    fn month_groups_by_first_trading_day() {
        let agg = Aggregator::new(TradingCalendar::utc());
        let bars = vec![
            bar(day(2024, 8, 30), 1.0, 2.0, 0.5, 1.5, 1.0),
            bar(day(2024, 9, 2), 1.5, 3.0, 1.0, 2.5, 1.0),
            bar(day(2024, 9, 30), 2.5, 4.0, 2.0, 3.5, 1.0),
        ];
        let window = AggregationWindow {
            covered: DayRange::new(day(2024, 8, 1), day(2024, 9, 30)),
            open_from: day(2024, 10, 1),
        };
        let out = agg.aggregate(&bars, Interval::Monthly, window);
        let starts: Vec<_> = out.iter().map(|b| b.bar.bucket_start).collect();
        assert_eq!(starts, vec![day(2024, 8, 1), day(2024, 9, 2)]);
        assert_eq!(out[1].bar.open, 1.5);
        assert_eq!(out[1].bar.close, 3.5);
        assert!(out.iter().all(|b| b.completeness == Completeness::Complete));
    }

    #[test]
    fn repeated_daily_buckets_collapse() {
        let agg = Aggregator::new(TradingCalendar::utc());
        let mut bars = first_week_of_sept_2025();
        bars.push(bars[2].clone());
        let covered = DayRange::new(day(2025, 9, 1), day(2025, 9, 5)).unwrap();
        let daily = agg.aggregate(&bars, Interval::Daily, closed_window(covered));
        assert_eq!(daily.len(), 5);
        let weekly = agg.aggregate(&bars, Interval::Weekly, closed_window(covered));
        assert_eq!(weekly[0].bar.volume, 720.0);
    }

    proptest! {
        #[test]
        fn output_ignores_input_order(shuffled in Just(first_week_of_sept_2025()).prop_shuffle(), idx in 0usize..3) {
            let agg = Aggregator::new(TradingCalendar::utc());
            let covered = DayRange::new(day(2025, 9, 1), day(2025, 9, 5)).unwrap();
            let iv = Interval::ALL[idx];
            let want = agg.aggregate(&first_week_of_sept_2025(), iv, closed_window(covered));
            let got = agg.aggregate(&shuffled, iv, closed_window(covered));
            prop_assert_eq!(got, want);
        }
    }
}
