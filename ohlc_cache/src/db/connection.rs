//! SQLite connection helpers.

use anyhow::Context;
use diesel::{
    Connection, RunQueryDsl, SqliteConnection,
    r2d2::{ConnectionManager, CustomizeConnection, Pool},
    sql_query,
};

/// Pool of tuned SQLite connections.
pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

const PRAGMAS: [&str; 3] = [
    "PRAGMA journal_mode=WAL;",
    "PRAGMA foreign_keys=ON;",
    "PRAGMA busy_timeout=5000;",
];

fn apply_pragmas(conn: &mut SqliteConnection) -> diesel::QueryResult<()> {
    for pragma in PRAGMAS {
        sql_query(pragma).execute(conn)?;
    }
    Ok(())
}

/// Open a SQLite connection and apply connection-wide PRAGMAs.
pub fn connect_sqlite(database_url: &str) -> anyhow::Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(database_url)
        .with_context(|| format!("open sqlite database {database_url}"))?;
    apply_pragmas(&mut conn)?;
    Ok(conn)
}

#[derive(Debug, Clone, Copy)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        apply_pragmas(conn).map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Build a connection pool; every connection gets the PRAGMAs on acquire.
pub fn build_pool(database_url: &str, max_size: u32) -> anyhow::Result<SqlitePool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    Pool::builder()
        .max_size(max_size.max(1))
        .connection_customizer(Box::new(SqlitePragmas))
        .build(manager)
        .with_context(|| format!("build sqlite pool for {database_url}"))
}
