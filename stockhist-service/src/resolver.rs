//! Three-tier history resolution.
//!
//! Given a symbol, interval and optional date range, returns a price series
//! from the first tier that has it:
//! 1. In-memory map keyed by (ticker, interval, start, end) → no I/O
//! 2. Durable store keyed by (ticker, interval) → populates tier 1
//! 3. Remote provider → populates tier 1, and tier 2 for full-history pulls
//!
//! `force_refresh` skips tiers 1 and 2. Only unbounded fetches are persisted,
//! so the durable tier only ever holds full-history snapshots; a ranged
//! request served from it gets the matching window of that snapshot. The
//! snapshot is skipped when that window would be empty, or when an explicit
//! `end` lies past the day after its last bar, since the tail may be missing.
//! An open `end` is served from the snapshot as is.

use crate::config::ServiceConfig;
use crate::error::{FetchError, ResolveError};
use anyhow::Context;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use stockhist_core::data::{
    DataProvider, HistoryStore, SnapshotMeta, SqliteStore, TickerHandle,
};
use stockhist_core::domain::{Interval, PriceSeries, Ticker};
use tracing::{debug, info, warn};

/// Options for a single [`HistoryResolver::resolve`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// First date to include.
    pub start: Option<NaiveDate>,
    /// First date to exclude.
    pub end: Option<NaiveDate>,
    /// Skip the memory and durable tiers and go straight to the provider.
    pub force_refresh: bool,
}

impl ResolveOptions {
    pub fn range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            start,
            end,
            force_refresh: false,
        }
    }

    pub fn refreshed(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    /// True when either bound is set.
    pub fn is_ranged(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }
}

/// Key of the in-memory tier. `force_refresh` is not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub ticker: Ticker,
    pub interval: Interval,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// Which tier answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Memory,
    Store,
    Remote,
}

/// A resolved series plus its provenance.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub series: Arc<PriceSeries>,
    pub source: Tier,
}

/// Cache-or-store-or-fetch resolver for price history.
///
/// Owns the provider, the durable store, the per-ticker handle cache and the
/// series cache. Mutating calls take `&mut self`; share it behind a `Mutex`
/// if more than one thread needs it.
pub struct HistoryResolver {
    provider: Box<dyn DataProvider>,
    store: Box<dyn HistoryStore>,
    handles: HashMap<Ticker, Box<dyn TickerHandle>>,
    series: HashMap<CacheKey, Arc<PriceSeries>>,
}

impl HistoryResolver {
    pub fn new(provider: Box<dyn DataProvider>, store: Box<dyn HistoryStore>) -> Self {
        Self {
            provider,
            store,
            handles: HashMap::new(),
            series: HashMap::new(),
        }
    }

    /// Open the SQLite store and build the Yahoo provider from `config`.
    pub fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        let store = SqliteStore::open(&config.db_path).with_context(|| {
            format!("failed to open history store {}", config.db_path.display())
        })?;
        let provider = config
            .provider
            .build_provider()
            .context("failed to build Yahoo Finance provider")?;
        Ok(Self::new(Box::new(provider), Box::new(store)))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Resolve history for `symbol` at `interval` (a human label such as
    /// `"week"` or a native code; unknown labels mean daily).
    pub fn resolve(
        &mut self,
        symbol: &str,
        interval: &str,
        opts: &ResolveOptions,
    ) -> Result<Arc<PriceSeries>, ResolveError> {
        self.resolve_with_source(symbol, interval, opts)
            .map(|resolved| resolved.series)
    }

    /// Like [`resolve`](Self::resolve), also reporting which tier answered.
    pub fn resolve_with_source(
        &mut self,
        symbol: &str,
        interval: &str,
        opts: &ResolveOptions,
    ) -> Result<Resolved, ResolveError> {
        let ticker = Ticker::parse(symbol)?;
        let key = CacheKey {
            ticker,
            interval: normalize_interval(interval),
            start: opts.start,
            end: opts.end,
        };

        if !opts.force_refresh {
            if let Some(series) = self.series.get(&key) {
                debug!(symbol = key.ticker.as_str(), interval = key.interval.code(), "memory hit");
                return Ok(Resolved {
                    series: Arc::clone(series),
                    source: Tier::Memory,
                });
            }

            if let Some(series) = self.load_stored(&key, opts)? {
                let series = Arc::new(series);
                self.series.insert(key, Arc::clone(&series));
                return Ok(Resolved {
                    series,
                    source: Tier::Store,
                });
            }
        }

        let fetched = self.fetch_remote(&key)?;
        if !opts.is_ranged() {
            self.store.upsert(&key.ticker, key.interval, &fetched)?;
        }

        let series = Arc::new(fetched);
        self.series.insert(key, Arc::clone(&series));
        Ok(Resolved {
            series,
            source: Tier::Remote,
        })
    }

    /// Drop every cached handle and series. The durable store is untouched.
    pub fn clear(&mut self) {
        debug!(
            handles = self.handles.len(),
            series = self.series.len(),
            "clearing resolver caches"
        );
        self.handles.clear();
        self.series.clear();
    }

    /// Symbols with at least one stored bar.
    pub fn known_symbols(&self) -> Result<BTreeSet<String>, ResolveError> {
        Ok(self.store.list_symbols()?)
    }

    /// Interval codes stored for `symbol`.
    pub fn known_intervals(&self, symbol: &str) -> Result<BTreeSet<String>, ResolveError> {
        Ok(self.store.list_intervals(symbol)?)
    }

    /// Metadata of the last durable save for the pair.
    pub fn snapshot(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<Option<SnapshotMeta>, ResolveError> {
        let ticker = Ticker::parse(symbol)?;
        Ok(self.store.snapshot(&ticker, normalize_interval(interval))?)
    }

    /// Number of series held in memory.
    pub fn cached_len(&self) -> usize {
        self.series.len()
    }

    fn load_stored(
        &self,
        key: &CacheKey,
        opts: &ResolveOptions,
    ) -> Result<Option<PriceSeries>, ResolveError> {
        let Some(stored) = self.store.load(&key.ticker, key.interval)? else {
            return Ok(None);
        };

        if let (Some(end), Some((_, last))) = (opts.end, stored.span()) {
            if last.date().succ_opt().is_some_and(|covered| end > covered) {
                debug!(
                    symbol = key.ticker.as_str(),
                    interval = key.interval.code(),
                    %end,
                    last_stored = %last.date(),
                    "requested range ends past stored snapshot"
                );
                return Ok(None);
            }
        }

        let series = if opts.is_ranged() {
            stored.window(opts.start, opts.end)
        } else {
            stored
        };

        if series.is_empty() {
            debug!(
                symbol = key.ticker.as_str(),
                interval = key.interval.code(),
                "stored snapshot has no bars in requested window"
            );
            return Ok(None);
        }

        debug!(
            symbol = key.ticker.as_str(),
            interval = key.interval.code(),
            bars = series.len(),
            "store hit"
        );
        Ok(Some(series))
    }

    fn fetch_remote(&mut self, key: &CacheKey) -> Result<PriceSeries, FetchError> {
        let symbol = key.ticker.as_str();
        let provider = &self.provider;
        let handle = self.handles.entry(key.ticker.clone()).or_insert_with(|| {
            debug!(symbol, provider = provider.name(), "opening provider handle");
            provider.open(&key.ticker)
        });

        info!(
            symbol,
            interval = key.interval.code(),
            start = ?key.start,
            end = ?key.end,
            "fetching history"
        );
        let series = handle
            .history(key.interval, key.start, key.end)
            .map_err(|source| {
                warn!(symbol, error = %source, "history fetch failed");
                FetchError::Provider {
                    symbol: symbol.to_string(),
                    source,
                }
            })?;

        if series.is_empty() {
            return Err(FetchError::NoData {
                symbol: symbol.to_string(),
            });
        }
        Ok(series)
    }
}

fn normalize_interval(label: &str) -> Interval {
    let (interval, recognized) = Interval::normalize(label);
    if !recognized {
        warn!(label, fallback = interval.code(), "unrecognized interval label");
    }
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stockhist_core::data::ProviderError;
    use stockhist_core::domain::Bar;

    /// Provider that returns a fixed daily series and counts opens/fetches.
    struct FixedProvider {
        days: u32,
        opens: Arc<AtomicUsize>,
        fetches: Arc<AtomicUsize>,
    }

    struct FixedHandle {
        ticker: Ticker,
        days: u32,
        fetches: Arc<AtomicUsize>,
    }

    impl DataProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn open(&self, ticker: &Ticker) -> Box<dyn TickerHandle> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Box::new(FixedHandle {
                ticker: ticker.clone(),
                days: self.days,
                fetches: Arc::clone(&self.fetches),
            })
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    impl TickerHandle for FixedHandle {
        fn ticker(&self) -> &Ticker {
            &self.ticker
        }

        fn history(
            &self,
            _interval: Interval,
            start: Option<NaiveDate>,
            end: Option<NaiveDate>,
        ) -> Result<PriceSeries, ProviderError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.ticker.as_str() == "FAIL" {
                return Err(ProviderError::Other("boom".into()));
            }
            let bars = (1..=self.days)
                .map(|d| Bar {
                    timestamp: NaiveDate::from_ymd_opt(2024, 1, d)
                        .unwrap()
                        .and_hms_opt(0, 0, 0)
                        .unwrap(),
                    open: d as f64,
                    high: d as f64,
                    low: d as f64,
                    close: d as f64,
                    volume: Some(100),
                })
                .collect();
            Ok(PriceSeries::from_unsorted(bars).window(start, end))
        }
    }

    struct Counters {
        opens: Arc<AtomicUsize>,
        fetches: Arc<AtomicUsize>,
    }

    fn resolver(days: u32) -> (HistoryResolver, Counters) {
        let opens = Arc::new(AtomicUsize::new(0));
        let fetches = Arc::new(AtomicUsize::new(0));
        let provider = FixedProvider {
            days,
            opens: Arc::clone(&opens),
            fetches: Arc::clone(&fetches),
        };
        let store = SqliteStore::open_in_memory().unwrap();
        (
            HistoryResolver::new(Box::new(provider), Box::new(store)),
            Counters { opens, fetches },
        )
    }

    fn date(day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2024, 1, day)
    }

    #[test]
    fn tiers_are_consulted_in_order() {
        let (mut r, counters) = resolver(5);
        let opts = ResolveOptions::default();

        let first = r.resolve_with_source("aapl", "day", &opts).unwrap();
        assert_eq!(first.source, Tier::Remote);

        let second = r.resolve_with_source("AAPL", "1d", &opts).unwrap();
        assert_eq!(second.source, Tier::Memory);

        r.clear();
        let third = r.resolve_with_source("AAPL", "day", &opts).unwrap();
        assert_eq!(third.source, Tier::Store);

        assert_eq!(counters.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(*first.series, *third.series);
    }

    #[test]
    fn handles_are_reused_until_clear() {
        let (mut r, counters) = resolver(3);
        let refresh = ResolveOptions::default().refreshed();

        r.resolve("SPY", "day", &refresh).unwrap();
        r.resolve("SPY", "week", &refresh).unwrap();
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);

        r.clear();
        r.resolve("SPY", "day", &refresh).unwrap();
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stored_snapshot_is_windowed_for_ranged_requests() {
        let (mut r, counters) = resolver(5);
        r.resolve("MSFT", "day", &ResolveOptions::default()).unwrap();

        let ranged = r
            .resolve_with_source("MSFT", "day", &ResolveOptions::range(date(2), date(4)))
            .unwrap();
        assert_eq!(ranged.source, Tier::Store);
        assert_eq!(ranged.series.len(), 2);
        assert_eq!(counters.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn range_ending_past_snapshot_falls_through_to_remote() {
        let (mut r, counters) = resolver(5);
        r.resolve("MSFT", "day", &ResolveOptions::default()).unwrap();

        // Jan 1..=5 stored; an end of Jan 6 (exclusive) is fully covered.
        let covered = r
            .resolve_with_source("MSFT", "day", &ResolveOptions::range(date(2), date(6)))
            .unwrap();
        assert_eq!(covered.source, Tier::Store);
        assert_eq!(covered.series.len(), 4);

        let past = r
            .resolve_with_source("MSFT", "day", &ResolveOptions::range(date(2), date(9)))
            .unwrap();
        assert_eq!(past.source, Tier::Remote);
        assert_eq!(counters.fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_window_falls_through_to_remote() {
        let (mut r, counters) = resolver(5);
        r.resolve("MSFT", "day", &ResolveOptions::default()).unwrap();

        let err = r
            .resolve("MSFT", "day", &ResolveOptions::range(date(10), None))
            .unwrap_err();
        assert!(matches!(err, ResolveError::Fetch(FetchError::NoData { .. })));
        assert_eq!(counters.fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn provider_failure_is_wrapped() {
        let (mut r, _) = resolver(3);
        let err = r
            .resolve("FAIL", "day", &ResolveOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Fetch(FetchError::Provider { ref symbol, .. }) if symbol == "FAIL"
        ));
        assert_eq!(r.cached_len(), 0);
        assert!(r.known_symbols().unwrap().is_empty());
    }

    #[test]
    fn unknown_interval_label_resolves_as_daily() {
        let (mut r, counters) = resolver(3);
        r.resolve("QQQ", "fortnight", &ResolveOptions::default()).unwrap();
        let again = r
            .resolve_with_source("QQQ", "day", &ResolveOptions::default())
            .unwrap();
        assert_eq!(again.source, Tier::Memory);
        assert_eq!(counters.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(
            r.known_intervals("qqq").unwrap().into_iter().collect::<Vec<_>>(),
            vec!["1d"]
        );
    }

    #[test]
    fn snapshot_reflects_full_history_save() {
        let (mut r, _) = resolver(4);
        assert!(r.snapshot("IBM", "day").unwrap().is_none());
        r.resolve("IBM", "day", &ResolveOptions::default()).unwrap();

        let meta = r.snapshot("ibm", "1d").unwrap().unwrap();
        assert_eq!(meta.bar_count, 4);
        assert!(r.snapshot("I", "day").is_err());
    }
}
