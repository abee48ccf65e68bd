//! Polars conversion for price series.
//!
//! Frame layout: `Date` (millisecond datetime), `Open`, `High`, `Low`,
//! `Close`, `Volume` (nullable u64).

use crate::domain::{Bar, PriceSeries, SeriesError};
use polars::prelude::*;

pub const COLUMNS: [&str; 6] = ["Date", "Open", "High", "Low", "Close", "Volume"];

impl PriceSeries {
    /// Convert to a Polars DataFrame, one row per bar.
    pub fn to_frame(&self) -> Result<DataFrame, SeriesError> {
        let bars = self.bars();
        let dates: Vec<i64> = bars
            .iter()
            .map(|b| b.timestamp.and_utc().timestamp_millis())
            .collect();
        let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
        let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<Option<u64>> = bars.iter().map(|b| b.volume).collect();

        DataFrame::new(vec![
            Column::new("Date".into(), dates)
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
                .map_err(|e| SeriesError::Frame(format!("date cast: {e}")))?,
            Column::new("Open".into(), opens),
            Column::new("High".into(), highs),
            Column::new("Low".into(), lows),
            Column::new("Close".into(), closes),
            Column::new("Volume".into(), volumes),
        ])
        .map_err(|e| SeriesError::Frame(format!("dataframe creation: {e}")))
    }

    /// Read a frame in the [`COLUMNS`] layout. Rows must be strictly
    /// increasing by `Date`.
    pub fn from_frame(df: &DataFrame) -> Result<Self, SeriesError> {
        let date_ca = column(df, "Date")?
            .datetime()
            .map_err(|e| SeriesError::Frame(format!("Date column type: {e}")))?;
        let open_ca = floats(df, "Open")?;
        let high_ca = floats(df, "High")?;
        let low_ca = floats(df, "Low")?;
        let close_ca = floats(df, "Close")?;
        let vol_ca = column(df, "Volume")?
            .u64()
            .map_err(|e| SeriesError::Frame(format!("Volume column type: {e}")))?;

        let mut bars = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let millis = date_ca
                .get(i)
                .ok_or_else(|| SeriesError::Frame(format!("null date at row {i}")))?;
            let timestamp = chrono::DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| SeriesError::Frame(format!("date out of range at row {i}")))?
                .naive_utc();

            bars.push(Bar {
                timestamp,
                open: open_ca.get(i).unwrap_or(f64::NAN),
                high: high_ca.get(i).unwrap_or(f64::NAN),
                low: low_ca.get(i).unwrap_or(f64::NAN),
                close: close_ca.get(i).unwrap_or(f64::NAN),
                volume: vol_ca.get(i),
            });
        }

        PriceSeries::new(bars)
    }
}

fn column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, SeriesError> {
    df.column(name)
        .map_err(|e| SeriesError::Frame(format!("missing column '{name}': {e}")))
}

fn floats<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Float64Chunked, SeriesError> {
    column(df, name)?
        .f64()
        .map_err(|e| SeriesError::Frame(format!("{name} column type: {e}")))
}
