//! Domain types: bars, series, tickers, intervals.

pub mod bar;
pub mod interval;
pub mod series;
pub mod ticker;

pub use bar::Bar;
pub use interval::Interval;
pub use series::{PriceSeries, SeriesError};
pub use ticker::{InvalidTicker, Ticker};
