//! Public entry point: `get_series` with per-symbol single-flight.
//!
//! Every request for a symbol goes through one pending-fetch slot. A request
//! whose daily range is already covered by the in-flight fetch attaches to it;
//! any other request waits for that fetch to finish and then plans again
//! against the updated coverage. Fetches run on their own tokio task, so a
//! caller that times out or is dropped never cancels work others are waiting on.
//! Different symbols never share a slot.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use quote_provider::QuoteProvider;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::{
    aggregate::{AggregatedBar, AggregationWindow, Aggregator, Completeness},
    bar::Bar,
    calendar::{DayRange, TradingCalendar},
    clock::Clock,
    config::CacheConfig,
    error::CacheError,
    fetcher::{CoverageOutcome, FailedWindow, IncrementalFetcher, RejectedBar, RetryPolicy, run_blocking},
    interval::{Interval, SeriesKind},
    store::{BarStore, ConsistencyViolation, SqliteBarStore},
};

const MAX_SYMBOL_LEN: usize = 32;

/// One bar of a [`Series`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesBar {
    #[serde(flatten)]
    pub bar: Bar,
    /// The bucket is still open or not fully covered.
    pub partial: bool,
    /// A daily bar inside this bucket disagreed with the upstream during this request.
    pub disputed: bool,
}

/// Problems met while serving a request. None of them fail the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeriesIssues {
    pub failed_windows: Vec<FailedWindow>,
    pub rejected: Vec<RejectedBar>,
    pub conflicts: Vec<ConsistencyViolation>,
    /// Set when the upstream could not be reached at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_error: Option<String>,
}

/// Response of [`CacheCoordinator::get_series`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub symbol: String,
    pub interval: Interval,
    pub kind: SeriesKind,
    pub bars: Vec<SeriesBar>,
    /// Some of the requested history up to today is missing or still moving.
    pub partial: bool,
    pub issues: SeriesIssues,
}

type SharedFetch = Shared<BoxFuture<'static, Result<CoverageOutcome, Arc<CacheError>>>>;

struct PendingFetch {
    id: u64,
    range: DayRange,
    handle: SharedFetch,
    waiters: Arc<AtomicUsize>,
}

struct Inner {
    fetcher: IncrementalFetcher,
    store: Arc<dyn BarStore>,
    calendar: TradingCalendar,
    clock: Arc<dyn Clock>,
    aggregator: Aggregator,
    pending: Mutex<HashMap<String, PendingFetch>>,
    next_id: AtomicU64,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingFetch>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Removes a finished fetch's slot, even if the fetch panicked.
struct SlotGuard {
    inner: Arc<Inner>,
    symbol: String,
    id: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut pending = self.inner.pending();
        if pending.get(&self.symbol).is_some_and(|p| p.id == self.id) {
            pending.remove(&self.symbol);
        }
    }
}

struct WaiterGuard(Arc<AtomicUsize>);

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Serves candle series from the cache, fetching only what is missing.
#[derive(Clone)]
pub struct CacheCoordinator {
    inner: Arc<Inner>,
}

impl CacheCoordinator {
    pub fn new(
        store: Arc<dyn BarStore>,
        provider: Arc<dyn QuoteProvider>,
        calendar: TradingCalendar,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        let fetcher = IncrementalFetcher::new(
            Arc::clone(&store),
            provider,
            calendar,
            Arc::clone(&clock),
            policy,
        );
        Self {
            inner: Arc::new(Inner {
                fetcher,
                store,
                calendar,
                clock,
                aggregator: Aggregator::new(calendar),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Opens the SQLite store named in `config` (applying migrations) and wires
    /// calendar and retry policy from it.
    pub fn from_config(
        config: &CacheConfig,
        provider: Arc<dyn QuoteProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        let calendar = config.calendar()?;
        let store = SqliteBarStore::open(&config.database_url, calendar)?;
        Ok(Self::new(
            Arc::new(store),
            provider,
            calendar,
            clock,
            config.retry_policy(),
        ))
    }

    pub fn store(&self) -> Arc<dyn BarStore> {
        Arc::clone(&self.inner.store)
    }

    pub fn calendar(&self) -> TradingCalendar {
        self.inner.calendar
    }

    /// Callers currently attached to `symbol`'s in-flight fetch, if one is running.
    pub fn in_flight(&self, symbol: &str) -> Option<usize> {
        self.inner
            .pending()
            .get(symbol)
            .map(|p| p.waiters.load(Ordering::Acquire))
    }

    /// Returns the `interval` series for `symbol` between `from` and `to`.
    ///
    /// Weekly and monthly requests are widened to whole edge buckets. Upstream
    /// trouble never fails the call: the stored data is served and
    /// [`Series::partial`] is set. Only malformed requests and storage failures
    /// are errors.
    #[instrument(skip(self), fields(symbol = %symbol, interval = %interval))]
    pub async fn get_series(
        &self,
        symbol: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Series, CacheError> {
        let symbol = normalize_symbol(symbol)?;
        if from > to {
            return Err(CacheError::InvalidRange { from, to });
        }

        let cal = self.inner.calendar;
        let range = DayRange::new(
            cal.bucket_span(cal.bucket_start(from, interval), interval).first,
            cal.bucket_span(cal.bucket_start(to, interval), interval).last,
        )
        .ok_or(CacheError::InvalidRange { from, to })?;

        let mut issues = SeriesIssues::default();
        let mut conflict_buckets = Vec::new();
        match self.coalesced_fetch(&symbol, range).await {
            Ok(outcome) => {
                conflict_buckets = outcome.conflicts.iter().map(|c| c.bucket_start).collect();
                issues.failed_windows = outcome.failed;
                issues.rejected = outcome.rejected;
                issues.conflicts = outcome.conflicts;
            }
            Err(e) if e.is_upstream() => {
                warn!(error = %e, "upstream unavailable; serving cached bars");
                issues.upstream_error = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }

        let owned = symbol.clone();
        let daily = run_blocking(&self.inner.store, move |s| {
            s.get_range(&owned, range.first, range.last)
        })
        .await?;
        let owned = symbol.clone();
        let coverage = run_blocking(&self.inner.store, move |s| s.get_coverage(&owned)).await?;

        let today = cal.day_start(self.inner.clock.now());
        let covered = coverage.map(|c| c.range());
        let aggregated = self.inner.aggregator.aggregate(
            &daily,
            interval,
            AggregationWindow {
                covered,
                open_from: today,
            },
        );

        let bars = series_bars(aggregated, &conflict_buckets);

        let missing_history = DayRange::new(range.first, range.last.min(today))
            .is_some_and(|needed| !covered.is_some_and(|c| c.covers(&needed)));
        let partial = missing_history
            || bars.iter().any(|b| b.partial)
            || !issues.failed_windows.is_empty()
            || issues.upstream_error.is_some();

        debug!(bars = bars.len(), partial, "series ready");
        Ok(Series {
            symbol,
            interval,
            kind: interval.kind(),
            bars,
            partial,
            issues,
        })
    }

    /// Runs `ensure_coverage` for `symbol` through the symbol's single-flight slot.
    async fn coalesced_fetch(
        &self,
        symbol: &str,
        range: DayRange,
    ) -> Result<CoverageOutcome, CacheError> {
        // The fetcher never looks past today, so neither does slot matching.
        let today = self.inner.calendar.day_start(self.inner.clock.now());
        let range = DayRange::new(range.first, range.last.min(today)).unwrap_or(range);

        loop {
            let (handle, waiter) = {
                let mut pending = self.inner.pending();
                match pending.get(symbol) {
                    Some(p) if p.range.covers(&range) => {
                        debug!(range = %p.range, "joining in-flight fetch");
                        p.waiters.fetch_add(1, Ordering::AcqRel);
                        (p.handle.clone(), Some(WaiterGuard(Arc::clone(&p.waiters))))
                    }
                    Some(p) => {
                        debug!(range = %p.range, "waiting for a narrower in-flight fetch");
                        (p.handle.clone(), None)
                    }
                    None => {
                        let slot = self.spawn_fetch(symbol, range);
                        let handle = slot.handle.clone();
                        let waiter = WaiterGuard(Arc::clone(&slot.waiters));
                        pending.insert(symbol.to_string(), slot);
                        (handle, Some(waiter))
                    }
                }
            };

            let result = handle.await;
            if waiter.is_some() {
                return result
                    .map_err(|e| Arc::try_unwrap(e).unwrap_or_else(CacheError::InFlight));
            }
            // The narrower fetch is done and its slot removed; plan again.
        }
    }

    fn spawn_fetch(&self, symbol: &str, range: DayRange) -> PendingFetch {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = SlotGuard {
            inner: Arc::clone(&self.inner),
            symbol: symbol.to_string(),
            id,
        };

        let task = tokio::spawn(async move {
            let result = guard
                .inner
                .fetcher
                .ensure_coverage(&guard.symbol, range)
                .await;
            drop(guard);
            result.map_err(Arc::new)
        });

        let handle = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(Arc::new(CacheError::TaskJoin(e.to_string()))),
            }
        }
        .boxed()
        .shared();

        PendingFetch {
            id,
            range,
            handle,
            waiters: Arc::new(AtomicUsize::new(1)),
        }
    }
}

fn series_bars(aggregated: Vec<AggregatedBar>, conflicts: &[DateTime<Utc>]) -> Vec<SeriesBar> {
    aggregated
        .into_iter()
        .map(|a| SeriesBar {
            partial: a.completeness == Completeness::Partial,
            disputed: conflicts.iter().any(|b| a.span.contains(*b)),
            bar: a.bar,
        })
        .collect()
}

/// Trims and upper-cases a ticker, rejecting anything a provider could not accept.
pub fn normalize_symbol(raw: &str) -> Result<String, CacheError> {
    let symbol = raw.trim().to_ascii_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '^' | '=' | '/'));
    if valid {
        Ok(symbol)
    } else {
        Err(CacheError::InvalidSymbol(raw.to_string()))
    }
}
