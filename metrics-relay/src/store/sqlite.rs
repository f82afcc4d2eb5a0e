use std::{
    collections::HashMap,
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use crate::{
    common::StoreError,
    metric::{Metric, MetricValue},
    store::{Snapshot, Store},
};

const SCHEMA: &str = "\
    CREATE TABLE IF NOT EXISTS gauges ( \
        name TEXT PRIMARY KEY, \
        value REAL NOT NULL \
    ); \
    CREATE TABLE IF NOT EXISTS counters ( \
        name TEXT PRIMARY KEY, \
        value INTEGER NOT NULL \
    );";

const UPSERT_GAUGE: &str = "INSERT INTO gauges (name, value) VALUES (?1, ?2) \
     ON CONFLICT(name) DO UPDATE SET value = excluded.value";

const UPSERT_COUNTER: &str = "INSERT INTO counters (name, value) VALUES (?1, ?2) \
     ON CONFLICT(name) DO UPDATE SET value = excluded.value";

const SELECT_COUNTER: &str = "SELECT value FROM counters WHERE name = ?1";

/// A durable metric store backed by SQLite.
///
/// Every write is an upsert: gauges overwrite the stored row, counters add to it. Counter sums
/// are computed with wrapping arithmetic before they are written, since SQLite would otherwise
/// promote an overflowing sum to REAL. Writes run inside an immediate transaction, so a batch
/// either applies completely or not at all.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`, creating the metric tables if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "Opened sqlite metric store.");
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // Dropping `tx` on error rolls everything back.
        let result = f(&*tx)?;
        tx.commit()?;
        Ok(result)
    }
}

fn upsert(conn: &Connection, name: &str, value: MetricValue) -> rusqlite::Result<MetricValue> {
    match value {
        MetricValue::Gauge(v) => {
            conn.prepare_cached(UPSERT_GAUGE)?.execute(params![name, v])?;
            Ok(MetricValue::Gauge(v))
        }
        MetricValue::Counter(d) => {
            let current = conn
                .prepare_cached(SELECT_COUNTER)?
                .query_row(params![name], |row| row.get::<_, i64>(0))
                .optional()?;
            let merged = current.map_or(d, |c| c.wrapping_add(d));
            conn.prepare_cached(UPSERT_COUNTER)?.execute(params![name, merged])?;
            Ok(MetricValue::Counter(merged))
        }
    }
}

impl Store for SqliteStore {
    fn update_gauge(&self, name: &str, value: f64) -> Result<(), StoreError> {
        self.write(|conn| upsert(conn, name, MetricValue::Gauge(value)))?;
        Ok(())
    }

    fn update_counter(&self, name: &str, delta: i64) -> Result<(), StoreError> {
        self.write(|conn| upsert(conn, name, MetricValue::Counter(delta)))?;
        Ok(())
    }

    fn update(&self, metric: &Metric) -> Result<MetricValue, StoreError> {
        self.write(|conn| upsert(conn, metric.name(), metric.value()))
    }

    fn batch_update(&self, metrics: &[Metric]) -> Result<(), StoreError> {
        self.write(|conn| {
            for metric in metrics {
                upsert(conn, metric.name(), metric.value())?;
            }
            Ok(())
        })
    }

    fn gauge(&self, name: &str) -> Result<Option<f64>, StoreError> {
        let value = self
            .conn()
            .query_row("SELECT value FROM gauges WHERE name = ?1", params![name], |row| {
                row.get::<_, f64>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn counter(&self, name: &str) -> Result<Option<i64>, StoreError> {
        let value = self
            .conn()
            .query_row(SELECT_COUNTER, params![name], |row| row.get::<_, i64>(0))
            .optional()?;
        Ok(value)
    }

    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let conn = self.conn();

        let mut stmt = conn.prepare_cached("SELECT name, value FROM gauges")?;
        let gauges = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;

        let mut stmt = conn.prepare_cached("SELECT name, value FROM counters")?;
        let counters = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;

        Ok(Snapshot { gauges, counters })
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.conn().query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}
