//! Incremental OHLC cache.
//!
//! Sits between a charting client and an upstream quote provider. Daily bars
//! are fetched once, stored in SQLite, and served back with weekly/monthly
//! series folded from them on read. See [`coordinator::CacheCoordinator`] for
//! the entry point.

pub mod aggregate;
pub mod bar;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod interval;
pub mod models;
pub mod schema;
pub mod store;
pub mod tz;

pub use coordinator::{CacheCoordinator, Series, SeriesBar};
pub use error::CacheError;
pub use interval::Interval;
