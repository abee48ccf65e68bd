//! SQLite-backed history store.
//!
//! Layout: one `stock_prices` row per (symbol, timestamp, interval) plus one
//! `snapshots` row per (symbol, interval) describing the last save.
//!
//! Timestamps are ISO-8601 text so that text order is time order. SQLite
//! stores NaN as NULL, so NULL prices load back as NaN.

use super::store::{HistoryStore, SnapshotMeta, StoreError};
use crate::domain::{Bar, Interval, PriceSeries, Ticker};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stock_prices (
    symbol    TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    interval  TEXT NOT NULL,
    open      REAL,
    high      REAL,
    low       REAL,
    close     REAL,
    volume    INTEGER,
    PRIMARY KEY (symbol, timestamp, interval)
);
CREATE TABLE IF NOT EXISTS snapshots (
    symbol    TEXT NOT NULL,
    interval  TEXT NOT NULL,
    first_ts  TEXT NOT NULL,
    last_ts   TEXT NOT NULL,
    bar_count INTEGER NOT NULL,
    data_hash TEXT NOT NULL,
    saved_at  TEXT NOT NULL,
    PRIMARY KEY (symbol, interval)
);
";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened history store");
        Self::with_connection(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Total stored bar rows across all symbols and intervals.
    pub fn row_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM stock_prices", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(raw: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{raw}': {e}")))
}

fn volume_to_sql(volume: Option<u64>) -> Result<Option<i64>, StoreError> {
    volume
        .map(|v| {
            i64::try_from(v).map_err(|_| StoreError::Serialization(format!("volume {v} overflows")))
        })
        .transpose()
}

impl HistoryStore for SqliteStore {
    fn upsert(
        &self,
        ticker: &Ticker,
        interval: Interval,
        series: &PriceSeries,
    ) -> Result<(), StoreError> {
        let Some((first, last)) = series.span() else {
            return Ok(());
        };
        let data_hash = series
            .content_hash()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO stock_prices
                     (symbol, timestamp, interval, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for bar in series {
                stmt.execute(params![
                    ticker.as_str(),
                    format_ts(&bar.timestamp),
                    interval.code(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    volume_to_sql(bar.volume)?,
                ])?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO snapshots
                 (symbol, interval, first_ts, last_ts, bar_count, data_hash, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                ticker.as_str(),
                interval.code(),
                format_ts(&first),
                format_ts(&last),
                series.len() as i64,
                data_hash,
                format_ts(&chrono::Utc::now().naive_utc()),
            ],
        )?;
        tx.commit()?;

        info!(
            symbol = ticker.as_str(),
            interval = interval.code(),
            bars = series.len(),
            void_bars = series.bars().iter().filter(|bar| bar.is_void()).count(),
            "saved history"
        );
        Ok(())
    }

    fn load(&self, ticker: &Ticker, interval: Interval) -> Result<Option<PriceSeries>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, open, high, low, close, volume
             FROM stock_prices
             WHERE symbol = ?1 AND interval = ?2
             ORDER BY timestamp ASC",
        )?;

        let rows = stmt.query_map(params![ticker.as_str(), interval.code()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<f64>>(1)?,
                row.get::<_, Option<f64>>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, Option<f64>>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        })?;

        let mut bars = Vec::new();
        for row in rows {
            let (ts, open, high, low, close, volume) = row?;
            bars.push(Bar {
                timestamp: parse_ts(&ts)?,
                open: open.unwrap_or(f64::NAN),
                high: high.unwrap_or(f64::NAN),
                low: low.unwrap_or(f64::NAN),
                close: close.unwrap_or(f64::NAN),
                volume: volume
                    .map(|v| {
                        u64::try_from(v)
                            .map_err(|_| StoreError::Corrupt(format!("negative volume {v}")))
                    })
                    .transpose()?,
            });
        }

        if bars.is_empty() {
            return Ok(None);
        }

        PriceSeries::new(bars)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn list_intervals(&self, symbol: &str) -> Result<BTreeSet<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT DISTINCT interval FROM stock_prices WHERE symbol = ?1")?;
        let intervals = stmt
            .query_map([symbol.trim().to_uppercase()], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(intervals)
    }

    fn list_symbols(&self) -> Result<BTreeSet<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT DISTINCT symbol FROM stock_prices")?;
        let symbols = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        debug!(count = symbols.len(), "listed stored symbols");
        Ok(symbols)
    }

    fn snapshot(
        &self,
        ticker: &Ticker,
        interval: Interval,
    ) -> Result<Option<SnapshotMeta>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT first_ts, last_ts, bar_count, data_hash, saved_at
                 FROM snapshots WHERE symbol = ?1 AND interval = ?2",
                params![ticker.as_str(), interval.code()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((first, last, bar_count, data_hash, saved_at)) = row else {
            return Ok(None);
        };

        Ok(Some(SnapshotMeta {
            symbol: ticker.as_str().to_string(),
            interval: interval.code().to_string(),
            first_timestamp: parse_ts(&first)?,
            last_timestamp: parse_ts(&last)?,
            bar_count: usize::try_from(bar_count)
                .map_err(|_| StoreError::Corrupt(format!("bar_count {bar_count}")))?,
            data_hash,
            saved_at: parse_ts(&saved_at)?,
        }))
    }
}
