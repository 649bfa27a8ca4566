//! Durable store of canonical daily bars and their coverage records.
//!
//! The store is the only writer of both tables. Everything goes through
//! [`BarStore::merge`], which applies a batch of bars for one fetch window and
//! extends the symbol's coverage in the same transaction.
//!
//! Replacement rules for an incoming bar whose bucket is already stored:
//! - the incoming bucket is still open (on or after today's day start): replace;
//! - the stored bar is provisional (on or after the day of the last tail refresh): replace;
//! - values are bit-identical: leave alone;
//! - otherwise: keep the stored bar and report a [`ConsistencyViolation`].
//!
//! The SQLite implementation lives in `sqlite.rs`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{bar::Bar, calendar::DayRange, calendar::TradingCalendar};

mod sqlite;

pub use sqlite::SqliteBarStore;

/// Errors raised by a [`BarStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A stored row could not be decoded.
    #[error("corrupt row for {symbol}: {message}")]
    Corrupt { symbol: String, message: String },

    /// The merge window would leave a hole between it and the existing coverage.
    #[error("window {window} for {symbol} is not contiguous with coverage {coverage}")]
    NonContiguous {
        symbol: String,
        window: DayRange,
        coverage: DayRange,
    },

    /// A bar in the batch lies outside the merge window.
    #[error("bar {bucket_start} for {symbol} lies outside merge window {window}")]
    OutsideWindow {
        symbol: String,
        bucket_start: DateTime<Utc>,
        window: DayRange,
    },

    /// Opening the database or applying migrations failed.
    #[error("store setup failed: {0}")]
    Setup(String),
}

/// Contiguous range of cached daily buckets for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub symbol: String,
    /// First covered daily bucket (inclusive).
    pub earliest: DateTime<Utc>,
    /// Last covered daily bucket (inclusive).
    pub latest: DateTime<Utc>,
    /// When a merge last reached the tail of the coverage.
    pub last_refreshed_at: DateTime<Utc>,
}

impl Coverage {
    pub fn range(&self) -> DayRange {
        DayRange {
            first: self.earliest,
            last: self.latest,
        }
    }

    /// Whether a stored bar at `bucket` may have been written while its day was still open.
    pub fn is_provisional(&self, bucket: DateTime<Utc>, calendar: &TradingCalendar) -> bool {
        bucket >= calendar.day_start(self.last_refreshed_at)
    }
}

/// Context a merge needs besides the bars themselves.
#[derive(Debug, Clone, Copy)]
pub struct MergeContext {
    /// Daily window the batch completely describes.
    pub window: DayRange,
    /// Current instant, from the injected clock.
    pub now: DateTime<Utc>,
}

/// A closed bar that the upstream now reports with different values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyViolation {
    pub symbol: String,
    pub bucket_start: DateTime<Utc>,
    /// Value kept in the store.
    pub stored: Bar,
    /// Value the upstream returned.
    pub incoming: Bar,
}

/// Outcome of one merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub conflicts: Vec<ConsistencyViolation>,
    /// Coverage after the merge.
    pub coverage: Option<Coverage>,
}

/// Portable store surface.
pub trait BarStore: Send + Sync {
    /// Daily bars with `from <= bucket_start <= to`, ascending. Gaps are allowed.
    fn get_range(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError>;

    /// Upserts `bars` and extends coverage by `ctx.window`, atomically.
    fn merge(&self, symbol: &str, bars: &[Bar], ctx: MergeContext)
    -> Result<MergeReport, StoreError>;

    fn get_coverage(&self, symbol: &str) -> Result<Option<Coverage>, StoreError>;

    /// Every symbol with bars or coverage, sorted.
    fn symbols(&self) -> Result<Vec<String>, StoreError>;

    /// Deletes a symbol's bars and coverage. Returns the number of bars removed.
    fn clear(&self, symbol: &str) -> Result<usize, StoreError>;
}
