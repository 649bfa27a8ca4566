//! Vendor-agnostic request and response shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single daily bar exactly as the upstream returned it.
///
/// Nothing about a `RawBar` is trusted: the timestamp may fall outside the
/// requested window, prices may violate OHLC ordering, and values may be NaN.
/// Consumers validate before storing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    /// Provider timestamp for the bar (UTC).
    pub timestamp: DateTime<Utc>,
    /// Opening price.
    pub open: f64,
    /// Highest price of the day.
    pub high: f64,
    /// Lowest price of the day.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Volume traded during the day.
    pub volume: f64,
}

/// Half-open time range `[start, end)` for an upstream request (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchWindow {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    /// Create a window. Returns `None` when `end <= start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Whether `ts` falls inside the window.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}
