use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::{debug, warn};

use super::{BarStore, ConsistencyViolation, Coverage, MergeContext, MergeReport, StoreError};
use crate::{
    bar::Bar,
    calendar::{DayRange, TradingCalendar},
    db::{
        connection::{self, SqlitePool},
        migrate,
    },
    models::{BarRow, CoverageRow, NewBarRow, NewCoverageRow},
    schema::{bars::dsl as b, coverage::dsl as c},
    tz,
};

const DEFAULT_POOL_SIZE: u32 = 8;

/// [`BarStore`] over a pooled SQLite database.
#[derive(Clone)]
pub struct SqliteBarStore {
    pool: SqlitePool,
    calendar: TradingCalendar,
}

impl std::fmt::Debug for SqliteBarStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBarStore")
            .field("calendar", &self.calendar)
            .finish_non_exhaustive()
    }
}

impl SqliteBarStore {
    /// Wraps an existing pool. Migrations must already be applied.
    pub fn new(pool: SqlitePool, calendar: TradingCalendar) -> Self {
        Self { pool, calendar }
    }

    /// Applies migrations to the database file at `database_url` and opens a pool over it.
    pub fn open(database_url: &str, calendar: TradingCalendar) -> Result<Self, StoreError> {
        migrate::run_sqlite(database_url).map_err(|e| StoreError::Setup(format!("{e:#}")))?;
        let pool = connection::build_pool(database_url, DEFAULT_POOL_SIZE)
            .map_err(|e| StoreError::Setup(format!("{e:#}")))?;
        Ok(Self::new(pool, calendar))
    }

    pub fn calendar(&self) -> TradingCalendar {
        self.calendar
    }
}

fn parse_ts(symbol: &str, s: &str) -> Result<DateTime<Utc>, StoreError> {
    tz::parse_ts_to_utc(s).map_err(|e| StoreError::Corrupt {
        symbol: symbol.to_string(),
        message: e.to_string(),
    })
}

fn row_to_bar(row: BarRow) -> Result<Bar, StoreError> {
    let bucket_start = parse_ts(&row.symbol, &row.bucket_start)?;
    Ok(Bar {
        symbol: row.symbol,
        bucket_start,
        open: row.open,
        high: row.high,
        low: row.low,
        close: row.close,
        volume: row.volume,
    })
}

fn row_to_coverage(row: CoverageRow) -> Result<Coverage, StoreError> {
    Ok(Coverage {
        earliest: parse_ts(&row.symbol, &row.earliest_bucket)?,
        latest: parse_ts(&row.symbol, &row.latest_bucket)?,
        last_refreshed_at: parse_ts(&row.symbol, &row.last_refreshed_at)?,
        symbol: row.symbol,
    })
}

fn load_coverage(
    conn: &mut SqliteConnection,
    symbol: &str,
) -> Result<Option<Coverage>, StoreError> {
    c::coverage
        .find(symbol)
        .select(CoverageRow::as_select())
        .first::<CoverageRow>(conn)
        .optional()?
        .map(row_to_coverage)
        .transpose()
}

/// Trading days strictly between two ranges must be zero, or the union would have a hole.
fn ensure_contiguous(
    calendar: &TradingCalendar,
    symbol: &str,
    window: DayRange,
    coverage: DayRange,
) -> Result<(), StoreError> {
    let hole = if window.first > coverage.last {
        DayRange::new(calendar.next_day(coverage.last), calendar.prev_day(window.first))
    } else if window.last < coverage.first {
        DayRange::new(calendar.next_day(window.last), calendar.prev_day(coverage.first))
    } else {
        None
    };
    match hole {
        Some(h) if calendar.trading_days(h) > 0 => Err(StoreError::NonContiguous {
            symbol: symbol.to_string(),
            window,
            coverage,
        }),
        _ => Ok(()),
    }
}

impl BarStore for SqliteBarStore {
    fn get_range(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError> {
        let mut pooled = self.pool.get()?;
        let conn: &mut SqliteConnection = &mut pooled;

        let rows = b::bars
            .filter(b::symbol.eq(symbol))
            .filter(b::bucket_start.ge(tz::to_rfc3339_millis(from)))
            .filter(b::bucket_start.le(tz::to_rfc3339_millis(to)))
            .order(b::bucket_start.asc())
            .select(BarRow::as_select())
            .load(conn)?;

        rows.into_iter().map(row_to_bar).collect()
    }

    fn merge(
        &self,
        symbol: &str,
        bars: &[Bar],
        ctx: MergeContext,
    ) -> Result<MergeReport, StoreError> {
        if let Some(stray) = bars.iter().find(|bar| !ctx.window.contains(bar.bucket_start)) {
            return Err(StoreError::OutsideWindow {
                symbol: symbol.to_string(),
                bucket_start: stray.bucket_start,
                window: ctx.window,
            });
        }

        let calendar = self.calendar;
        let mut pooled = self.pool.get()?;
        let conn: &mut SqliteConnection = &mut pooled;

        let report = conn.immediate_transaction(|conn| {
            let prior = load_coverage(conn, symbol)?;
            if let Some(cov) = &prior {
                ensure_contiguous(&calendar, symbol, ctx.window, cov.range())?;
            }

            let stored: HashMap<String, BarRow> = b::bars
                .filter(b::symbol.eq(symbol))
                .filter(b::bucket_start.ge(tz::to_rfc3339_millis(ctx.window.first)))
                .filter(b::bucket_start.le(tz::to_rfc3339_millis(ctx.window.last)))
                .select(BarRow::as_select())
                .load::<BarRow>(conn)?
                .into_iter()
                .map(|row| (row.bucket_start.clone(), row))
                .collect();

            let today = calendar.day_start(ctx.now);
            let mut report = MergeReport::default();

            for bar in bars {
                let key = tz::to_rfc3339_millis(bar.bucket_start);
                let Some(row) = stored.get(&key) else {
                    diesel::insert_into(b::bars)
                        .values(NewBarRow {
                            symbol,
                            bucket_start: &key,
                            open: bar.open,
                            high: bar.high,
                            low: bar.low,
                            close: bar.close,
                            volume: bar.volume,
                        })
                        .execute(conn)?;
                    report.inserted += 1;
                    continue;
                };

                let current = row_to_bar(row.clone())?;
                if current.same_values(bar) {
                    report.unchanged += 1;
                    continue;
                }

                let mutable = bar.bucket_start >= today
                    || prior
                        .as_ref()
                        .is_none_or(|cov| cov.is_provisional(current.bucket_start, &calendar));
                if mutable {
                    diesel::update(b::bars.find((symbol, key.as_str())))
                        .set((
                            b::open.eq(bar.open),
                            b::high.eq(bar.high),
                            b::low.eq(bar.low),
                            b::close.eq(bar.close),
                            b::volume.eq(bar.volume),
                        ))
                        .execute(conn)?;
                    report.replaced += 1;
                } else {
                    warn!(
                        symbol,
                        bucket = %key,
                        stored_close = current.close,
                        incoming_close = bar.close,
                        "upstream disagrees with a closed bar; keeping stored value"
                    );
                    report.conflicts.push(ConsistencyViolation {
                        symbol: symbol.to_string(),
                        bucket_start: bar.bucket_start,
                        stored: current,
                        incoming: Bar {
                            symbol: symbol.to_string(),
                            ..bar.clone()
                        },
                    });
                }
            }

            let next = match prior {
                None => Coverage {
                    symbol: symbol.to_string(),
                    earliest: ctx.window.first,
                    latest: ctx.window.last,
                    last_refreshed_at: ctx.now,
                },
                Some(cov) => {
                    let reaches_tail = ctx.window.last >= cov.latest;
                    Coverage {
                        earliest: cov.earliest.min(ctx.window.first),
                        latest: cov.latest.max(ctx.window.last),
                        last_refreshed_at: if reaches_tail {
                            cov.last_refreshed_at.max(ctx.now)
                        } else {
                            cov.last_refreshed_at
                        },
                        symbol: cov.symbol,
                    }
                }
            };

            let earliest = tz::to_rfc3339_millis(next.earliest);
            let latest = tz::to_rfc3339_millis(next.latest);
            let refreshed = tz::to_rfc3339_millis(next.last_refreshed_at);
            diesel::insert_into(c::coverage)
                .values(NewCoverageRow {
                    symbol,
                    earliest_bucket: &earliest,
                    latest_bucket: &latest,
                    last_refreshed_at: &refreshed,
                })
                .on_conflict(c::symbol)
                .do_update()
                .set((
                    c::earliest_bucket.eq(&earliest),
                    c::latest_bucket.eq(&latest),
                    c::last_refreshed_at.eq(&refreshed),
                ))
                .execute(conn)?;

            report.coverage = Some(next);
            Ok::<_, StoreError>(report)
        })?;

        debug!(
            symbol,
            window = %ctx.window,
            inserted = report.inserted,
            replaced = report.replaced,
            unchanged = report.unchanged,
            conflicts = report.conflicts.len(),
            "merged bars"
        );
        Ok(report)
    }

    fn get_coverage(&self, symbol: &str) -> Result<Option<Coverage>, StoreError> {
        let mut pooled = self.pool.get()?;
        load_coverage(&mut pooled, symbol)
    }

    fn symbols(&self) -> Result<Vec<String>, StoreError> {
        let mut pooled = self.pool.get()?;
        let conn: &mut SqliteConnection = &mut pooled;

        let mut all: BTreeSet<String> = b::bars
            .select(b::symbol)
            .distinct()
            .load::<String>(conn)?
            .into_iter()
            .collect();
        all.extend(c::coverage.select(c::symbol).load::<String>(conn)?);
        Ok(all.into_iter().collect())
    }

    fn clear(&self, symbol: &str) -> Result<usize, StoreError> {
        let mut pooled = self.pool.get()?;
        let conn: &mut SqliteConnection = &mut pooled;

        conn.immediate_transaction(|conn| {
            let removed = diesel::delete(b::bars.filter(b::symbol.eq(symbol))).execute(conn)?;
            diesel::delete(c::coverage.find(symbol)).execute(conn)?;
            Ok::<_, StoreError>(removed)
        })
    }
}
