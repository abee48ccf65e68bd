//! Resolves price history across memory, disk and network.
//!
//! Entry point is [`HistoryResolver`]; build one from a [`ServiceConfig`] or
//! from any provider/store pair.

pub mod config;
pub mod error;
pub mod resolver;

pub use config::{ConfigError, ProviderConfig, ServiceConfig};
pub use error::{FetchError, ResolveError};
pub use resolver::{CacheKey, HistoryResolver, ResolveOptions, Resolved, Tier};
