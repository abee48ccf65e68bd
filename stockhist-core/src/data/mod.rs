//! Data sources and persistence: remote providers, the durable store, frames.

pub mod circuit_breaker;
pub mod frame;
pub mod provider;
pub mod sqlite;
pub mod store;
pub mod yahoo;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use provider::{DataProvider, ProviderError, TickerHandle};
pub use sqlite::SqliteStore;
pub use store::{HistoryStore, SnapshotMeta, StoreError};
pub use yahoo::{YahooProvider, YahooSettings};
