//! Error types for history resolution.

use stockhist_core::data::{ProviderError, StoreError};
use stockhist_core::domain::InvalidTicker;
use thiserror::Error;

/// The remote tier failed to produce data.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no data returned for ticker '{symbol}'")]
    NoData { symbol: String },

    #[error("failed to fetch data for ticker '{symbol}'")]
    Provider {
        symbol: String,
        #[source]
        source: ProviderError,
    },
}

/// Errors from [`crate::HistoryResolver`].
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    InvalidTicker(#[from] InvalidTicker),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("history store: {0}")]
    Store(#[from] StoreError),
}
