//! Exchange-time helpers.
//!
//! What this module provides:
//! - [`parse_ts_to_utc`]: Parse RFC-3339 timestamps with an explicit offset and convert to UTC.
//! - [`parse_timezone`]: Resolve an IANA zone name (e.g. "America/New_York").
//! - [`from_local_naive_with_policy`]: Convert an exchange-local wall time to UTC, choosing
//!   how DST gaps and ambiguities are resolved via [`DstPolicy`].
//! - [`local_midnight_utc`]: The UTC instant at which an exchange-local date begins.
//! - [`to_rfc3339_millis`]: The canonical text form used for every stored timestamp.
//!
//! Notes:
//! - Ambiguous local times happen during "fall back" when a wall time occurs twice.
//! - Nonexistent local times happen during "spring forward" when a wall time is skipped.
//!   A handful of zones move their clocks at midnight, so even day starts can hit both.
//! - All database writes are RFC-3339 UTC strings with millisecond precision, which keeps
//!   lexicographic order equal to chronological order inside SQLite.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// Failures converting between text, exchange time, and UTC.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TzError {
    /// Text is not RFC-3339.
    #[error("bad rfc3339 timestamp: {0}")]
    BadTimestamp(String),
    /// Unknown IANA zone name.
    #[error("bad time zone: {0}")]
    BadZone(String),
    /// Local time falls twice and the policy does not pick one.
    #[error("ambiguous local time {0}")]
    Ambiguous(NaiveDateTime),
    /// Local time is skipped and the policy does not shift it.
    #[error("nonexistent local time {0}")]
    Nonexistent(NaiveDateTime),
}

/// RFC-3339 with offset -> UTC.
///
/// Example:
/// - "2024-03-10T09:30:00-05:00" -> "2024-03-10T14:30:00Z"
pub fn parse_ts_to_utc(s: &str) -> Result<DateTime<Utc>, TzError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TzError::BadTimestamp(s.to_string()))
}

/// Parse an IANA zone name.
pub fn parse_timezone(name: &str) -> Result<Tz, TzError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| TzError::BadZone(name.to_string()))
}

/// Policy for handling DST edge cases when converting local naive timestamps to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DstPolicy {
    /// Error on ambiguous (fall-back) or nonexistent (spring-forward) local times.
    Strict,
    /// For ambiguous local times pick the earlier instant; error on gaps.
    PreferEarliest,
    /// For ambiguous local times pick the later instant; error on gaps.
    PreferLatest,
    /// Earliest instant on ambiguity; on a gap, step forward one minute at a time
    /// (capped at 2 hours) until the wall time exists.
    ShiftForward,
}

/// Convert a naive local timestamp to UTC using a specific zone and DST policy.
pub fn from_local_naive_with_policy(
    naive: NaiveDateTime,
    tz: Tz,
    policy: DstPolicy,
) -> Result<DateTime<Utc>, TzError> {
    use chrono::offset::LocalResult::*;
    match tz.from_local_datetime(&naive) {
        Single(dt) => Ok(dt.with_timezone(&Utc)),
        Ambiguous(a, b) => match policy {
            DstPolicy::PreferEarliest | DstPolicy::ShiftForward => Ok(a.with_timezone(&Utc)),
            DstPolicy::PreferLatest => Ok(b.with_timezone(&Utc)),
            DstPolicy::Strict => Err(TzError::Ambiguous(naive)),
        },
        None => match policy {
            DstPolicy::ShiftForward => {
                let mut t = naive;
                for _ in 0..120 {
                    t += chrono::Duration::minutes(1);
                    match tz.from_local_datetime(&t) {
                        Single(dt) | Ambiguous(dt, _) => return Ok(dt.with_timezone(&Utc)),
                        None => continue,
                    }
                }
                Err(TzError::Nonexistent(naive))
            }
            _ => Err(TzError::Nonexistent(naive)),
        },
    }
}

/// The UTC instant at which `date` begins on the exchange clock.
pub fn local_midnight_utc(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(chrono::NaiveTime::MIN);
    // No zone in the tz database skips more than two hours, so ShiftForward always resolves.
    from_local_naive_with_policy(naive, tz, DstPolicy::ShiftForward).unwrap_or_else(|_| naive.and_utc())
}

/// Format a UTC datetime as an RFC-3339 string with millisecond precision.
pub fn to_rfc3339_millis(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
