pub mod catalog;
pub mod migrations;
pub mod queries;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

pub type Db = Arc<Mutex<Connection>>;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIME_FORMAT: &str = "%H:%M:%S";

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .context("failed to set database pragmas")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// Locks the shared connection. A panic while holding the lock leaves SQLite itself
/// consistent (open transactions roll back on drop), so poisoning is ignored.
pub fn lock(db: &Db) -> MutexGuard<'_, Connection> {
    db.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs `f` inside a `BEGIN IMMEDIATE` transaction, committing only when it succeeds.
/// The write lock is taken up front, so reads made inside `f` cannot go stale before
/// the commit.
pub fn write_tx<T, E>(db: &Db, f: impl FnOnce(&Transaction<'_>) -> Result<T, E>) -> Result<T, E>
where
    E: From<rusqlite::Error>,
{
    let mut conn = lock(db);
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

pub fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub fn parse_datetime(s: &str) -> anyhow::Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .with_context(|| format!("invalid stored datetime: {s}"))?;
    Ok(naive.and_utc())
}

pub fn fmt_time(t: &NaiveTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

pub fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, TIME_FORMAT).with_context(|| format!("invalid stored time: {s}"))
}
