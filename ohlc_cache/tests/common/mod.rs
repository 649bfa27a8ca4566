#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc, Weekday};
use diesel::QueryableByName;
use diesel::prelude::*;
use diesel::sql_types::{Integer, Text};
use ohlc_cache::bar::Bar;
use ohlc_cache::calendar::TradingCalendar;
use ohlc_cache::db::{connection, migrate};
use ohlc_cache::store::SqliteBarStore;
use quote_provider::providers::ApiSnafu;
use quote_provider::{FetchWindow, ProviderError, QuoteProvider, RawBar};
use tempfile::TempDir;
use tokio::sync::Semaphore;

#[derive(QueryableByName)]
struct JournalMode {
    #[diesel(sql_type = Text)]
    journal_mode: String,
}
#[derive(QueryableByName)]
struct ForeignKeys {
    #[diesel(sql_type = Integer)]
    foreign_keys: i32,
}
#[derive(QueryableByName)]
struct BusyTimeout {
    #[diesel(sql_type = Integer, column_name = "timeout")]
    busy_timeout: i32,
}

pub struct TestDb {
    _dir: TempDir,    // keep alive for the life of the test
    pub path: String, // <tmpdir>/test.db
}

/// Fresh migrated database plus a store over it, on UTC days.
pub fn setup_db() -> (TestDb, SqliteBarStore) {
    let dir = TempDir::new().expect("tempdir");
    let mut p = PathBuf::from(dir.path());
    p.push("test.db");
    let path = p.to_string_lossy().to_string();

    let store = SqliteBarStore::open(&path, TradingCalendar::utc()).expect("open store");
    (TestDb { _dir: dir, path }, store)
}

/// Migrated database and a single tuned connection, for raw SQL checks.
pub fn setup_conn() -> (TestDb, SqliteConnection) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("test.db").to_string_lossy().to_string();
    migrate::run_sqlite(&path).expect("migrations");
    let conn = connection::connect_sqlite(&path).expect("connect");
    (TestDb { _dir: dir, path }, conn)
}

pub fn assert_sqlite_pragmas(conn: &mut SqliteConnection) {
    use diesel::sql_query;

    let jm: JournalMode = sql_query("PRAGMA journal_mode;").get_result(conn).unwrap();
    assert_eq!(jm.journal_mode.to_lowercase(), "wal");

    let fk: ForeignKeys = sql_query("PRAGMA foreign_keys;").get_result(conn).unwrap();
    assert_eq!(fk.foreign_keys, 1);

    let bt: BusyTimeout = sql_query("PRAGMA busy_timeout;").get_result(conn).unwrap();
    assert_eq!(bt.busy_timeout, 5000);
}

pub fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

pub fn bar(symbol: &str, bucket_start: DateTime<Utc>, close: f64) -> Bar {
    Bar {
        symbol: symbol.to_string(),
        bucket_start,
        open: close - 0.5,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1000.0,
    }
}

pub fn raw(timestamp: DateTime<Utc>, close: f64) -> RawBar {
    RawBar {
        timestamp,
        open: close - 0.5,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1000.0,
    }
}

/// Weekday daily bars in `[first, last]` with closes counting up from 100.
pub fn weekday_bars(symbol: &str, first: DateTime<Utc>, last: DateTime<Utc>) -> Vec<Bar> {
    let mut out = Vec::new();
    let mut d = first;
    let mut close = 100.0;
    while d <= last {
        if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(bar(symbol, d, close));
            close += 1.0;
        }
        d += chrono::Duration::days(1);
    }
    out
}

pub fn transient() -> ProviderError {
    ApiSnafu {
        status: 503u16,
        message: "service unavailable",
    }
    .build()
}

pub fn permanent() -> ProviderError {
    ApiSnafu {
        status: 404u16,
        message: "unknown symbol",
    }
    .build()
}

/// In-memory upstream that records every call.
#[derive(Default)]
pub struct ScriptedProvider {
    bars: Mutex<BTreeMap<DateTime<Utc>, RawBar>>,
    /// Returned verbatim (instead of `bars`) while non-empty, one batch per call.
    batches: Mutex<VecDeque<Vec<RawBar>>>,
    failures: Mutex<VecDeque<ProviderError>>,
    /// Windows starting before this instant always fail transiently.
    fail_before: Mutex<Option<DateTime<Utc>>>,
    delay: Mutex<Option<Duration>>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    windows: Mutex<Vec<FetchWindow>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call blocks until the returned semaphore gets a permit.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                gate: Some(Arc::clone(&gate)),
                ..Self::default()
            },
            gate,
        )
    }

    pub fn with_bars(self, bars: impl IntoIterator<Item = RawBar>) -> Self {
        self.set_bars(bars);
        self
    }

    pub fn set_bars(&self, bars: impl IntoIterator<Item = RawBar>) {
        let mut map = self.bars.lock().unwrap();
        for b in bars {
            map.insert(b.timestamp, b);
        }
    }

    pub fn push_batch(&self, batch: Vec<RawBar>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn push_failure(&self, err: ProviderError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn fail_before(&self, instant: DateTime<Utc>) {
        *self.fail_before.lock().unwrap() = Some(instant);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn windows(&self) -> Vec<FetchWindow> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuoteProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, _symbol: &str, window: FetchWindow) -> Result<Vec<RawBar>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.windows.lock().unwrap().push(window);

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if self.fail_before.lock().unwrap().is_some_and(|t| window.start < t) {
            return Err(transient());
        }
        if let Some(batch) = self.batches.lock().unwrap().pop_front() {
            return Ok(batch);
        }
        Ok(self
            .bars
            .lock()
            .unwrap()
            .range(window.start..window.end)
            .map(|(_, b)| b.clone())
            .collect())
    }
}
