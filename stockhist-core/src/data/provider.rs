//! Data provider traits and structured error types.
//!
//! A `DataProvider` hands out per-ticker `TickerHandle`s; the handle does the
//! actual history fetch. The resolver sits above these traits and owns the
//! handle cache, so providers never know about caching or persistence.

use crate::domain::{Interval, PriceSeries, Ticker};
use chrono::NaiveDate;
use thiserror::Error;

/// Structured error types for remote fetches.
///
/// These are designed to be displayable in both CLI and dashboard contexts.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped, retry in {retry_after_secs}s)")]
    CircuitBreakerTripped { retry_after_secs: u64 },

    #[error("provider error: {0}")]
    Other(String),
}

/// A per-ticker handle able to fetch history for that ticker.
pub trait TickerHandle: Send {
    /// The ticker this handle was opened for.
    fn ticker(&self) -> &Ticker;

    /// Fetch bars at `interval`. `start` is inclusive, `end` exclusive; with
    /// neither bound the provider returns the full available history.
    ///
    /// An empty series is a valid answer; deciding whether that is an error
    /// is left to the caller.
    fn history(
        &self,
        interval: Interval,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<PriceSeries, ProviderError>;
}

/// Trait for remote history sources (Yahoo Finance, test doubles).
pub trait DataProvider: Send {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Open a handle for `ticker`. Opening is cheap and performs no I/O.
    fn open(&self, ticker: &Ticker) -> Box<dyn TickerHandle>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}
