//! An ordered, timestamp-unique run of bars.

use super::bar::Bar;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("bar {index} is not strictly after its predecessor")]
    OutOfOrder { index: usize },

    #[error("frame conversion: {0}")]
    Frame(String),
}

/// Bars sorted ascending by timestamp with no duplicate timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Bar>", into = "Vec<Bar>")]
pub struct PriceSeries {
    bars: Vec<Bar>,
}

impl PriceSeries {
    /// Checked constructor: bars must already be strictly increasing.
    pub fn new(bars: Vec<Bar>) -> Result<Self, SeriesError> {
        if let Some(pos) = bars
            .windows(2)
            .position(|w| w[0].timestamp >= w[1].timestamp)
        {
            return Err(SeriesError::OutOfOrder { index: pos + 1 });
        }
        Ok(Self { bars })
    }

    /// Sort and de-duplicate. On a timestamp collision the later bar wins.
    pub fn from_unsorted(mut bars: Vec<Bar>) -> Self {
        // Stable sort keeps input order among equal timestamps.
        bars.sort_by_key(|b| b.timestamp);
        let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match out.last_mut() {
                Some(last) if last.timestamp == bar.timestamp => *last = bar,
                _ => out.push(bar),
            }
        }
        Self { bars: out }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// First and last timestamps, if any.
    pub fn span(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        Some((self.bars.first()?.timestamp, self.bars.last()?.timestamp))
    }

    /// Bars with `start <= date < end`. Either bound may be open.
    pub fn window(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        let bars = self
            .bars
            .iter()
            .filter(|b| start.map_or(true, |s| b.date() >= s))
            .filter(|b| end.map_or(true, |e| b.date() < e))
            .cloned()
            .collect();
        Self { bars }
    }

    /// BLAKE3 hex digest over the JSON encoding of the bars.
    pub fn content_hash(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(&self.bars)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

impl TryFrom<Vec<Bar>> for PriceSeries {
    type Error = SeriesError;

    fn try_from(bars: Vec<Bar>) -> Result<Self, Self::Error> {
        Self::new(bars)
    }
}

impl From<PriceSeries> for Vec<Bar> {
    fn from(series: PriceSeries) -> Self {
        series.bars
    }
}

impl<'a> IntoIterator for &'a PriceSeries {
    type Item = &'a Bar;
    type IntoIter = std::slice::Iter<'a, Bar>;

    fn into_iter(self) -> Self::IntoIter {
        self.bars.iter()
    }
}
