//! Durable history store trait.
//!
//! The store holds full-history snapshots keyed by (symbol, interval), one row
//! per bar. Writes are upserts, so saving the same period twice is a no-op.

use crate::domain::{Interval, PriceSeries, Ticker};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt stored row: {0}")]
    Corrupt(String),

    #[error("serialization: {0}")]
    Serialization(String),
}

/// Description of the most recent upsert for a (symbol, interval).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub symbol: String,
    pub interval: String,
    pub first_timestamp: NaiveDateTime,
    pub last_timestamp: NaiveDateTime,
    pub bar_count: usize,
    pub data_hash: String,
    pub saved_at: NaiveDateTime,
}

pub trait HistoryStore: Send {
    /// Insert or replace every bar of `series`. Empty series are ignored.
    fn upsert(
        &self,
        ticker: &Ticker,
        interval: Interval,
        series: &PriceSeries,
    ) -> Result<(), StoreError>;

    /// All stored bars for the pair, ascending; `None` if nothing is stored.
    fn load(&self, ticker: &Ticker, interval: Interval) -> Result<Option<PriceSeries>, StoreError>;

    /// Distinct interval codes stored for `symbol` (trimmed and upper-cased first).
    fn list_intervals(&self, symbol: &str) -> Result<BTreeSet<String>, StoreError>;

    /// Distinct symbols in the store.
    fn list_symbols(&self) -> Result<BTreeSet<String>, StoreError>;

    /// Metadata of the last upsert for the pair, if any.
    fn snapshot(&self, ticker: &Ticker, interval: Interval)
        -> Result<Option<SnapshotMeta>, StoreError>;
}
