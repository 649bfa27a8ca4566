use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use ohlc_cache::{
    CacheCoordinator, Interval,
    calendar::TradingCalendar,
    clock::{Clock, SystemClock},
    config::{CacheConfig, load_config_path},
    coordinator::normalize_symbol,
    db::migrate,
    store::{BarStore, SqliteBarStore},
    tz,
};
use quote_provider::providers::http::HttpQuoteProvider;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Incremental OHLC cache CLI")]
struct Cli {
    /// TOML config file.
    #[arg(long, value_name = "FILE", default_value = "ohlc_cache.toml", global = true)]
    config: String,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Apply embedded migrations.
    Migrate,
    /// Print a series as JSON, fetching whatever is missing.
    Series {
        #[arg(long)]
        symbol: String,
        /// daily | weekly | monthly (or 1D / 1W / 1M)
        #[arg(long, default_value = "daily")]
        interval: Interval,
        /// YYYY-MM-DD (exchange date) or RFC3339
        #[arg(long)]
        from: String,
        /// Defaults to now.
        #[arg(long)]
        to: Option<String>,
    },
    /// Print coverage records.
    Coverage {
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Delete a symbol's bars and coverage.
    Purge {
        #[arg(long)]
        symbol: String,
    },
}

fn parse_instant(raw: &str, calendar: &TradingCalendar) -> Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(calendar.date_start(date));
    }
    tz::parse_ts_to_utc(raw).with_context(|| format!("expected YYYY-MM-DD or RFC3339, got {raw}"))
}

fn open_store(cfg: &CacheConfig) -> Result<SqliteBarStore> {
    Ok(SqliteBarStore::open(&cfg.database_url, cfg.calendar()?)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ohlc_cache=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config_path(&cli.config)
        .with_context(|| format!("load config {}", cli.config))?;

    match cli.cmd {
        Cmd::Migrate => {
            migrate::run_sqlite(&cfg.database_url)?;
            info!(database = %cfg.database_url, "migrations applied");
        }
        Cmd::Series {
            symbol,
            interval,
            from,
            to,
        } => {
            let calendar = cfg.calendar()?;
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            let from = parse_instant(&from, &calendar)?;
            let to = match to {
                Some(raw) => parse_instant(&raw, &calendar)?,
                None => clock.now(),
            };

            let provider = HttpQuoteProvider::new(cfg.http_settings()?)
                .context("build quote provider")?;
            let coordinator = CacheCoordinator::from_config(&cfg, Arc::new(provider), clock)?;
            let series = coordinator.get_series(&symbol, interval, from, to).await?;
            println!("{}", serde_json::to_string_pretty(&series)?);
        }
        Cmd::Coverage { symbol } => {
            let store = open_store(&cfg)?;
            let symbols = match symbol {
                Some(s) => vec![normalize_symbol(&s)?],
                None => store.symbols()?,
            };
            let mut records = Vec::with_capacity(symbols.len());
            for s in &symbols {
                if let Some(cov) = store.get_coverage(s)? {
                    records.push(cov);
                }
            }
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Cmd::Purge { symbol } => {
            let store = open_store(&cfg)?;
            let symbol = normalize_symbol(&symbol)?;
            let removed = store.clear(&symbol)?;
            info!(%symbol, removed, "purged");
        }
    }

    Ok(())
}
