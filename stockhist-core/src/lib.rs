//! Price history domain types and data plumbing.
//!
//! - Domain types (bars, price series, tickers, intervals)
//! - Remote provider seam with a Yahoo Finance implementation and circuit breaker
//! - Durable history store seam with a SQLite implementation
//! - Polars frame conversion for price series

pub mod data;
pub mod domain;
