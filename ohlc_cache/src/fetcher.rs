//! Incremental fetcher: fills coverage holes from the upstream with as few
//! requests as possible.
//!
//! For a requested daily range it asks the store for the symbol's coverage and
//! plans at most two windows:
//! - a prefix `[range.first, prev_day(earliest)]` when the request starts earlier;
//! - a suffix from `next_day(latest)` (or from `latest` itself while it is
//!   provisional) through the end of the request.
//!
//! Today's bucket is always re-fetched when the request reaches it, folded into
//! the suffix. Each window is fetched with retries, validated, then merged on
//! its own so one failure cannot discard another window's bars.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use quote_provider::{FetchWindow, QuoteProvider, RawBar};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    bar::Bar,
    calendar::{DayRange, TradingCalendar},
    clock::Clock,
    error::CacheError,
    store::{BarStore, ConsistencyViolation, Coverage, MergeContext, StoreError},
};

/// Retry and timeout settings for upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per window, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Per-call timeout; a timeout counts as a transient failure.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `retry`-th failure (0-based): `initial * 2^retry`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff
            .checked_mul(1u32 << retry.min(31))
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// A raw bar dropped during validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedBar {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// A window the upstream could not serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedWindow {
    pub window: DayRange,
    pub attempts: u32,
    /// Last error seen.
    pub message: String,
}

/// What one [`IncrementalFetcher::ensure_coverage`] call did.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageOutcome {
    pub requested: DayRange,
    /// Windows merged into the store.
    pub fetched: Vec<DayRange>,
    pub failed: Vec<FailedWindow>,
    pub rejected: Vec<RejectedBar>,
    pub conflicts: Vec<ConsistencyViolation>,
    /// Provider calls made, retries included.
    pub upstream_calls: u32,
}

impl CoverageOutcome {
    fn new(requested: DayRange) -> Self {
        Self {
            requested,
            fetched: Vec::new(),
            failed: Vec::new(),
            rejected: Vec::new(),
            conflicts: Vec::new(),
            upstream_calls: 0,
        }
    }
}

/// Runs a store call on the blocking pool.
pub(crate) async fn run_blocking<T, F>(store: &Arc<dyn BarStore>, f: F) -> Result<T, CacheError>
where
    T: Send + 'static,
    F: FnOnce(&dyn BarStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| CacheError::TaskJoin(e.to_string()))?
        .map_err(CacheError::from)
}

/// Windows to request so that, together with `coverage`, `range` is fully covered
/// and the coverage stays contiguous.
pub fn plan_windows(
    calendar: &TradingCalendar,
    range: DayRange,
    coverage: Option<&Coverage>,
    today: DateTime<Utc>,
) -> Vec<DayRange> {
    let Some(cov) = coverage else {
        return vec![range];
    };

    let mut windows = Vec::with_capacity(2);
    if range.first < cov.earliest {
        if let Some(prefix) = DayRange::new(range.first, calendar.prev_day(cov.earliest)) {
            windows.push(prefix);
        }
    }

    let mut tail_start = if cov.is_provisional(cov.latest, calendar) {
        cov.latest
    } else {
        calendar.next_day(cov.latest)
    };
    if range.last >= today {
        tail_start = tail_start.min(today);
    }
    if let Some(suffix) = DayRange::new(tail_start, range.last) {
        windows.push(suffix);
    }
    windows
}

/// Fetches, validates and merges the parts of a range the store lacks.
#[derive(Clone)]
pub struct IncrementalFetcher {
    store: Arc<dyn BarStore>,
    provider: Arc<dyn QuoteProvider>,
    calendar: TradingCalendar,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl IncrementalFetcher {
    pub fn new(
        store: Arc<dyn BarStore>,
        provider: Arc<dyn QuoteProvider>,
        calendar: TradingCalendar,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            provider,
            calendar,
            clock,
            policy,
        }
    }

    pub fn calendar(&self) -> TradingCalendar {
        self.calendar
    }

    /// Brings the store's coverage of `symbol` up to `range` (clamped to today).
    ///
    /// Returns `Err(UpstreamUnavailable)` only when every window that needed the
    /// upstream failed; partial success is reported through
    /// [`CoverageOutcome::failed`].
    #[instrument(skip(self), fields(provider = self.provider.name(), range = %range))]
    pub async fn ensure_coverage(
        &self,
        symbol: &str,
        range: DayRange,
    ) -> Result<CoverageOutcome, CacheError> {
        let now = self.clock.now();
        let today = self.calendar.day_start(now);
        let mut outcome = CoverageOutcome::new(range);

        let Some(range) = DayRange::new(range.first, range.last.min(today)) else {
            debug!("range lies in the future; nothing to fetch");
            return Ok(outcome);
        };

        let owned = symbol.to_string();
        let coverage = run_blocking(&self.store, move |s| s.get_coverage(&owned)).await?;
        let windows = plan_windows(&self.calendar, range, coverage.as_ref(), today);
        if windows.is_empty() {
            debug!("cache hit");
            return Ok(outcome);
        }
        debug!(?windows, "planned upstream windows");

        for window in windows {
            let bars = if self.calendar.trading_days(window) == 0 {
                debug!(%window, "no trading days; extending coverage without a fetch");
                Vec::new()
            } else {
                match self.fetch_with_retry(symbol, window).await {
                    Ok((raw, attempts)) => {
                        outcome.upstream_calls += attempts;
                        let (bars, rejected) = self.validate(symbol, window, raw);
                        outcome.rejected.extend(rejected);
                        bars
                    }
                    Err(failed) => {
                        outcome.upstream_calls += failed.attempts;
                        outcome.failed.push(failed);
                        continue;
                    }
                }
            };

            let owned = symbol.to_string();
            let count = bars.len();
            let ctx = MergeContext { window, now };
            let report =
                run_blocking(&self.store, move |s| s.merge(&owned, &bars, ctx)).await?;
            info!(
                %window,
                bars = count,
                inserted = report.inserted,
                replaced = report.replaced,
                conflicts = report.conflicts.len(),
                "merged upstream window"
            );
            outcome.conflicts.extend(report.conflicts);
            outcome.fetched.push(window);
        }

        if outcome.fetched.is_empty() {
            if let Some(last) = outcome.failed.last() {
                let first = outcome.failed.first().map_or(last.window.first, |f| f.window.first);
                return Err(CacheError::UpstreamUnavailable {
                    symbol: symbol.to_string(),
                    window: DayRange {
                        first,
                        last: last.window.last,
                    },
                    attempts: outcome.failed.iter().map(|f| f.attempts).sum(),
                    message: last.message.clone(),
                });
            }
        }
        Ok(outcome)
    }

    async fn fetch_with_retry(
        &self,
        symbol: &str,
        window: DayRange,
    ) -> Result<(Vec<RawBar>, u32), FailedWindow> {
        let fetch_window = self.fetch_window(window);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result =
                tokio::time::timeout(self.policy.timeout, self.provider.fetch(symbol, fetch_window))
                    .await;
            let (message, transient) = match result {
                Ok(Ok(raw)) => {
                    info!(%window, attempt, bars = raw.len(), "upstream fetch ok");
                    return Ok((raw, attempt));
                }
                Ok(Err(e)) => (e.to_string(), e.is_transient()),
                Err(_) => (format!("timed out after {:?}", self.policy.timeout), true),
            };

            if !transient || attempt >= max_attempts {
                warn!(%window, attempt, transient, error = %message, "upstream fetch failed");
                return Err(FailedWindow {
                    window,
                    attempts: attempt,
                    message,
                });
            }

            let delay = self.policy.backoff(attempt - 1);
            warn!(%window, attempt, ?delay, error = %message, "upstream fetch failed; retrying");
            tokio::time::sleep(delay).await;
        }
    }

    /// `[first, next_day(last))` in UTC.
    fn fetch_window(&self, window: DayRange) -> FetchWindow {
        let end = self.calendar.next_day(window.last);
        FetchWindow::new(window.first, end).unwrap_or(FetchWindow {
            start: window.first,
            end: window.first + chrono::Duration::days(1),
        })
    }

    /// Keeps raw bars that land inside `window`, arrive in strictly increasing
    /// order, map to a fresh daily bucket and satisfy the bar invariants.
    fn validate(
        &self,
        symbol: &str,
        window: DayRange,
        raw: Vec<RawBar>,
    ) -> (Vec<Bar>, Vec<RejectedBar>) {
        let fetch_window = self.fetch_window(window);
        let mut accepted: Vec<Bar> = Vec::with_capacity(raw.len());
        let mut rejected = Vec::new();
        let mut last_ts: Option<DateTime<Utc>> = None;

        for r in raw {
            let reason = if !fetch_window.contains(r.timestamp) {
                Some("outside requested window".to_string())
            } else if last_ts.is_some_and(|prev| r.timestamp <= prev) {
                Some("timestamp not increasing".to_string())
            } else {
                None
            };
            if let Some(reason) = reason {
                rejected.push(RejectedBar {
                    timestamp: r.timestamp,
                    reason,
                });
                continue;
            }
            last_ts = Some(r.timestamp);

            let bucket_start = self.calendar.day_start(r.timestamp);
            if accepted.last().is_some_and(|b| b.bucket_start == bucket_start) {
                rejected.push(RejectedBar {
                    timestamp: r.timestamp,
                    reason: "duplicate daily bucket".to_string(),
                });
                continue;
            }

            let bar = Bar {
                symbol: symbol.to_string(),
                bucket_start,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.volume,
            };
            match bar.check_invariants() {
                Ok(()) => accepted.push(bar),
                Err(violation) => rejected.push(RejectedBar {
                    timestamp: r.timestamp,
                    reason: violation.to_string(),
                }),
            }
        }

        for r in &rejected {
            warn!(symbol, timestamp = %r.timestamp, reason = %r.reason, "rejected upstream bar");
        }
        (accepted, rejected)
    }
}
