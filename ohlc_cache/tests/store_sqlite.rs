use ohlc_cache::calendar::DayRange;
use ohlc_cache::store::{BarStore, MergeContext, StoreError};

mod common;

use common::{at, bar, day, weekday_bars};

fn window(first: chrono::DateTime<chrono::Utc>, last: chrono::DateTime<chrono::Utc>) -> DayRange {
    DayRange::new(first, last).expect("ordered window")
}

#[test]
fn connections_get_pragmas() {
    let (_db, mut conn) = common::setup_conn();
    common::assert_sqlite_pragmas(&mut conn);
}

#[test]
fn merging_the_same_batch_twice_is_idempotent() {
    let (_db, store) = common::setup_db();
    let bars = weekday_bars("AAPL", day(2025, 9, 1), day(2025, 9, 5));
    let ctx = MergeContext {
        window: window(day(2025, 9, 1), day(2025, 9, 5)),
        now: at(2025, 9, 10, 12),
    };

    let first = store.merge("AAPL", &bars, ctx).unwrap();
    assert_eq!(first.inserted, 5);

    let second = store.merge("AAPL", &bars, ctx).unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.replaced, 0);
    assert_eq!(second.unchanged, 5);
    assert!(second.conflicts.is_empty());
    assert_eq!(first.coverage, second.coverage);

    let stored = store.get_range("AAPL", day(2025, 9, 1), day(2025, 9, 5)).unwrap();
    assert_eq!(stored, bars);
}

#[test]
fn get_range_is_ascending_and_bounded() {
    let (_db, store) = common::setup_db();
    let mut bars = weekday_bars("AAPL", day(2025, 9, 1), day(2025, 9, 12));
    bars.reverse();
    store
        .merge(
            "AAPL",
            &bars,
            MergeContext {
                window: window(day(2025, 9, 1), day(2025, 9, 12)),
                now: at(2025, 9, 20, 0),
            },
        )
        .unwrap();

    let got = store.get_range("AAPL", day(2025, 9, 3), day(2025, 9, 9)).unwrap();
    let starts: Vec<_> = got.iter().map(|b| b.bucket_start).collect();
    assert_eq!(
        starts,
        vec![day(2025, 9, 3), day(2025, 9, 4), day(2025, 9, 5), day(2025, 9, 8), day(2025, 9, 9)]
    );
    assert!(store.get_range("MSFT", day(2025, 9, 1), day(2025, 9, 12)).unwrap().is_empty());
}

#[test]
fn closed_bar_conflict_keeps_stored_value() {
    let (_db, store) = common::setup_db();
    let ctx = MergeContext {
        window: window(day(2025, 9, 1), day(2025, 9, 5)),
        now: at(2025, 9, 10, 12),
    };
    store
        .merge("AAPL", &weekday_bars("AAPL", day(2025, 9, 1), day(2025, 9, 5)), ctx)
        .unwrap();

    let revised = vec![bar("AAPL", day(2025, 9, 2), 150.0)];
    let report = store
        .merge(
            "AAPL",
            &revised,
            MergeContext {
                window: window(day(2025, 9, 2), day(2025, 9, 2)),
                now: at(2025, 9, 11, 12),
            },
        )
        .unwrap();

    assert_eq!(report.replaced, 0);
    assert_eq!(report.conflicts.len(), 1);
    let c = &report.conflicts[0];
    assert_eq!(c.bucket_start, day(2025, 9, 2));
    assert_eq!(c.stored.close, 101.0);
    assert_eq!(c.incoming.close, 150.0);

    let kept = store.get_range("AAPL", day(2025, 9, 2), day(2025, 9, 2)).unwrap();
    assert_eq!(kept[0].close, 101.0);
}

#[test]
fn conflict_does_not_block_the_rest_of_the_batch() {
    let (_db, store) = common::setup_db();
    store
        .merge(
            "AAPL",
            &weekday_bars("AAPL", day(2025, 9, 1), day(2025, 9, 5)),
            MergeContext {
                window: window(day(2025, 9, 1), day(2025, 9, 5)),
                now: at(2025, 9, 10, 12),
            },
        )
        .unwrap();

    // Friday is closed and disagrees; Monday is new.
    let now = at(2025, 9, 11, 12);
    let batch = vec![bar("AAPL", day(2025, 9, 5), 150.0), bar("AAPL", day(2025, 9, 8), 151.0)];
    let report = store
        .merge(
            "AAPL",
            &batch,
            MergeContext {
                window: window(day(2025, 9, 5), day(2025, 9, 8)),
                now,
            },
        )
        .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.replaced, 0);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].bucket_start, day(2025, 9, 5));

    let cov = store.get_coverage("AAPL").unwrap().unwrap();
    assert_eq!((cov.earliest, cov.latest), (day(2025, 9, 1), day(2025, 9, 8)));
    assert_eq!(cov.last_refreshed_at, now);
    assert_eq!(report.coverage, Some(cov));

    let got = store.get_range("AAPL", day(2025, 9, 5), day(2025, 9, 8)).unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].close, 104.0);
    assert_eq!(got[1].close, 151.0);
}

#[test]
fn provisional_and_open_bars_are_replaced() {
    let (_db, store) = common::setup_db();
    // Friday's bar is written while Friday is still trading.
    store
        .merge(
            "AAPL",
            &weekday_bars("AAPL", day(2025, 9, 1), day(2025, 9, 5)),
            MergeContext {
                window: window(day(2025, 9, 1), day(2025, 9, 5)),
                now: at(2025, 9, 5, 15),
            },
        )
        .unwrap();

    let monday_now = at(2025, 9, 8, 14);
    let tail = vec![bar("AAPL", day(2025, 9, 5), 110.0), bar("AAPL", day(2025, 9, 8), 111.0)];
    let report = store
        .merge(
            "AAPL",
            &tail,
            MergeContext {
                window: window(day(2025, 9, 5), day(2025, 9, 8)),
                now: monday_now,
            },
        )
        .unwrap();
    assert_eq!(report.replaced, 1);
    assert_eq!(report.inserted, 1);
    assert!(report.conflicts.is_empty());

    // Monday is the open bucket: a second intraday revision replaces it.
    let report = store
        .merge(
            "AAPL",
            &[bar("AAPL", day(2025, 9, 8), 112.0)],
            MergeContext {
                window: window(day(2025, 9, 8), day(2025, 9, 8)),
                now: monday_now + chrono::Duration::hours(1),
            },
        )
        .unwrap();
    assert_eq!(report.replaced, 1);

    let cov = store.get_coverage("AAPL").unwrap().unwrap();
    assert_eq!(cov.earliest, day(2025, 9, 1));
    assert_eq!(cov.latest, day(2025, 9, 8));
    assert_eq!(cov.last_refreshed_at, monday_now + chrono::Duration::hours(1));

    let got = store.get_range("AAPL", day(2025, 9, 5), day(2025, 9, 8)).unwrap();
    assert_eq!(got[0].close, 110.0);
    assert_eq!(got[1].close, 112.0);
}

#[test]
fn prefix_merge_keeps_refresh_time() {
    let (_db, store) = common::setup_db();
    let refreshed = at(2025, 9, 13, 9);
    store
        .merge(
            "AAPL",
            &weekday_bars("AAPL", day(2025, 9, 8), day(2025, 9, 12)),
            MergeContext {
                window: window(day(2025, 9, 8), day(2025, 9, 12)),
                now: refreshed,
            },
        )
        .unwrap();

    let report = store
        .merge(
            "AAPL",
            &weekday_bars("AAPL", day(2025, 9, 1), day(2025, 9, 7)),
            MergeContext {
                window: window(day(2025, 9, 1), day(2025, 9, 7)),
                now: at(2025, 9, 20, 9),
            },
        )
        .unwrap();

    let cov = report.coverage.unwrap();
    assert_eq!(cov.earliest, day(2025, 9, 1));
    assert_eq!(cov.latest, day(2025, 9, 12));
    assert_eq!(cov.last_refreshed_at, refreshed);
}

#[test]
fn windows_must_touch_coverage() {
    let (_db, store) = common::setup_db();
    let now = at(2025, 9, 20, 0);
    store
        .merge(
            "AAPL",
            &weekday_bars("AAPL", day(2025, 9, 1), day(2025, 9, 5)),
            MergeContext {
                window: window(day(2025, 9, 1), day(2025, 9, 5)),
                now,
            },
        )
        .unwrap();

    // A week-long hole is refused.
    let err = store
        .merge(
            "AAPL",
            &weekday_bars("AAPL", day(2025, 9, 15), day(2025, 9, 16)),
            MergeContext {
                window: window(day(2025, 9, 15), day(2025, 9, 16)),
                now,
            },
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::NonContiguous { .. }));

    // Only a weekend in between is fine.
    store
        .merge(
            "AAPL",
            &weekday_bars("AAPL", day(2025, 9, 8), day(2025, 9, 9)),
            MergeContext {
                window: window(day(2025, 9, 8), day(2025, 9, 9)),
                now,
            },
        )
        .unwrap();
    assert_eq!(store.get_coverage("AAPL").unwrap().unwrap().latest, day(2025, 9, 9));
}

#[test]
fn bars_outside_the_window_abort_the_merge() {
    let (_db, store) = common::setup_db();
    let err = store
        .merge(
            "AAPL",
            &weekday_bars("AAPL", day(2025, 9, 1), day(2025, 9, 5)),
            MergeContext {
                window: window(day(2025, 9, 1), day(2025, 9, 3)),
                now: at(2025, 9, 20, 0),
            },
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::OutsideWindow { .. }));
    assert!(store.get_coverage("AAPL").unwrap().is_none());
    assert!(store.get_range("AAPL", day(2025, 9, 1), day(2025, 9, 5)).unwrap().is_empty());
}

#[test]
fn barless_merge_creates_coverage() {
    let (_db, store) = common::setup_db();
    // a weekend
    let report = store
        .merge(
            "AAPL",
            &[],
            MergeContext {
                window: window(day(2025, 9, 6), day(2025, 9, 7)),
                now: at(2025, 9, 8, 0),
            },
        )
        .unwrap();
    assert_eq!(report.inserted, 0);
    let cov = store.get_coverage("AAPL").unwrap().unwrap();
    assert_eq!((cov.earliest, cov.latest), (day(2025, 9, 6), day(2025, 9, 7)));
}

#[test]
fn symbols_and_clear() {
    let (_db, store) = common::setup_db();
    let ctx = MergeContext {
        window: window(day(2025, 9, 1), day(2025, 9, 5)),
        now: at(2025, 9, 20, 0),
    };
    for sym in ["MSFT", "AAPL"] {
        store
            .merge(sym, &weekday_bars(sym, day(2025, 9, 1), day(2025, 9, 5)), ctx)
            .unwrap();
    }
    assert_eq!(store.symbols().unwrap(), vec!["AAPL".to_string(), "MSFT".to_string()]);

    assert_eq!(store.clear("AAPL").unwrap(), 5);
    assert!(store.get_coverage("AAPL").unwrap().is_none());
    assert_eq!(store.symbols().unwrap(), vec!["MSFT".to_string()]);
    assert_eq!(store.clear("AAPL").unwrap(), 0);
}
