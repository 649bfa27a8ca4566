//! Series intervals.
//!
//! Only [`Interval::Daily`] is ever stored. Weekly and monthly series are derived
//! from daily bars on every read, so an [`Interval`] also tells callers which
//! [`SeriesKind`] they get back.
//!
//! ```
//! use ohlc_cache::interval::Interval;
//!
//! let iv: Interval = "1W".parse().unwrap();
//! assert_eq!(iv, Interval::Weekly);
//! assert_eq!(iv.to_string(), "weekly");
//! ```

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bucket granularity of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    /// One exchange day.
    Daily,
    /// Monday-labelled exchange week.
    Weekly,
    /// Calendar month, labelled by its first trading day.
    Monthly,
}

/// Whether a series was read straight from storage or folded from daily bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    /// The stored daily series.
    Canonical,
    /// Recomputed from the canonical daily series.
    Derived,
}

impl Interval {
    /// All supported intervals, finest first.
    pub const ALL: [Interval; 3] = [Interval::Daily, Interval::Weekly, Interval::Monthly];

    /// Which kind of series this interval produces.
    pub const fn kind(self) -> SeriesKind {
        match self {
            Interval::Daily => SeriesKind::Canonical,
            Interval::Weekly | Interval::Monthly => SeriesKind::Derived,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
        };
        f.write_str(s)
    }
}

/// Text that names no supported interval.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown interval `{0}` (expected daily/weekly/monthly or 1D/1W/1M)")]
pub struct ParseIntervalError(pub String);

/// Accepts the long names and the short chart forms (`1D`, `1W`, `1M`).
///
/// `M` is month and `m` would be minute in chart shorthand, so the short forms are
/// case-sensitive; the long names are not.
impl FromStr for Interval {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        match t {
            "D" | "1D" | "1d" => return Ok(Interval::Daily),
            "W" | "1W" | "1w" => return Ok(Interval::Weekly),
            "M" | "1M" | "1mo" => return Ok(Interval::Monthly),
            _ => {}
        }
        match t.to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Interval::Daily),
            "weekly" | "week" => Ok(Interval::Weekly),
            "monthly" | "month" => Ok(Interval::Monthly),
            _ => Err(ParseIntervalError(s.to_string())),
        }
    }
}
