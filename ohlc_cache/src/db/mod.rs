//! Database utilities for connections and schema migrations.
//!
//! - [`connection::connect_sqlite`] opens a single tuned connection (WAL,
//!   foreign_keys=ON, 5000ms busy_timeout).
//! - [`connection::build_pool`] builds an r2d2 pool whose connections get the same PRAGMAs.
//! - [`migrate::run_sqlite`] applies the embedded migrations.
//!
//! Example:
//! ```no_run
//! use ohlc_cache::db::{connection, migrate};
//!
//! let db_path = std::env::temp_dir().join("ohlc_cache_example.db");
//! migrate::run_sqlite(db_path.to_str().unwrap()).expect("migrations");
//! let _pool = connection::build_pool(db_path.to_str().unwrap(), 4).expect("pool");
//! ```

pub mod connection;
pub mod migrate;
