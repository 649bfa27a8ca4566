//! Diesel row types for [`crate::schema`].
//!
//! Timestamps are stored as RFC3339 UTC text with millisecond precision
//! ([`crate::tz::to_rfc3339_millis`]), so string order equals time order and
//! range scans can use the primary key directly.

use diesel::prelude::*;

use crate::schema::{bars, coverage};

/// A row in [`crate::schema::bars`]: one canonical daily bar.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = bars, check_for_backend(diesel::sqlite::Sqlite))]
pub struct BarRow {
    pub symbol: String,
    /// RFC3339 UTC daily bucket start.
    pub bucket_start: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Insertable form of [`BarRow`].
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = bars)]
pub struct NewBarRow<'a> {
    pub symbol: &'a str,
    pub bucket_start: &'a str,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A row in [`crate::schema::coverage`]: contiguous cached daily range for a symbol.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = coverage, check_for_backend(diesel::sqlite::Sqlite))]
pub struct CoverageRow {
    pub symbol: String,
    /// Inclusive first daily bucket.
    pub earliest_bucket: String,
    /// Inclusive last daily bucket.
    pub latest_bucket: String,
    /// Instant of the last merge that reached the tail.
    pub last_refreshed_at: String,
}

/// Insertable form of [`CoverageRow`].
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = coverage)]
pub struct NewCoverageRow<'a> {
    pub symbol: &'a str,
    pub earliest_bucket: &'a str,
    pub latest_bucket: &'a str,
    pub last_refreshed_at: &'a str,
}
