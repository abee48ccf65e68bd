//! Yahoo Finance data provider.
//!
//! Fetches OHLCV bars from Yahoo's v8 chart API. Each request is classified
//! as success, transient failure (429, 5xx, connect/timeout; retried with
//! exponential backoff and counted by the circuit breaker), ban (403; trips
//! the breaker) or fatal failure (401, 404, other 4xx, bad body).
//!
//! Yahoo Finance has no official API and is subject to unannounced format changes.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataProvider, ProviderError, TickerHandle};
use crate::domain::{Bar, Interval, PriceSeries, Ticker};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Upper bound on retries accepted from configuration.
pub const MAX_RETRIES: u32 = 10;

/// Longest single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

/// HTTP and retry settings for [`YahooProvider`].
#[derive(Debug, Clone)]
pub struct YahooSettings {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for YahooSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Shared by the provider and every handle it opens.
struct YahooClient {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
}

/// Yahoo Finance data provider.
pub struct YahooProvider {
    inner: Arc<YahooClient>,
}

impl YahooProvider {
    pub fn new(
        settings: YahooSettings,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent)
            .build()
            .map_err(|e| ProviderError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(YahooClient {
                client,
                circuit_breaker,
                base_url: settings.base_url.trim_end_matches('/').to_string(),
                max_retries: settings.max_retries,
                base_delay: settings.base_delay,
            }),
        })
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.circuit_breaker
    }
}

impl DataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn open(&self, ticker: &Ticker) -> Box<dyn TickerHandle> {
        Box::new(YahooTicker {
            ticker: ticker.clone(),
            client: Arc::clone(&self.inner),
        })
    }

    fn is_available(&self) -> bool {
        self.inner.circuit_breaker.is_allowed()
    }
}

/// Handle for one ticker on Yahoo Finance.
pub struct YahooTicker {
    ticker: Ticker,
    client: Arc<YahooClient>,
}

impl TickerHandle for YahooTicker {
    fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    fn history(
        &self,
        interval: Interval,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<PriceSeries, ProviderError> {
        let now = chrono::Utc::now().timestamp();
        let url = chart_url(
            &self.client.base_url,
            self.ticker.as_str(),
            interval,
            start,
            end,
            now,
        );
        self.client.fetch_with_retry(self.ticker.as_str(), &url)
    }
}

/// Yahoo's wire code for an interval.
fn wire_interval(interval: Interval) -> &'static str {
    match interval {
        Interval::Day => "1d",
        Interval::Week => "1wk",
        Interval::Month => "1mo",
    }
}

fn midnight_ts(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// Build the chart API URL. With no bounds the full history is requested;
/// otherwise a missing start means the epoch and a missing end means `now`.
fn chart_url(
    base_url: &str,
    symbol: &str,
    interval: Interval,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    now: i64,
) -> String {
    let interval = wire_interval(interval);
    match (start, end) {
        (None, None) => format!("{base_url}/{symbol}?range=max&interval={interval}&events=split"),
        _ => {
            let period1 = start.map_or(0, midnight_ts);
            let period2 = end.map_or(now, midnight_ts);
            format!(
                "{base_url}/{symbol}?period1={period1}&period2={period2}\
                 &interval={interval}&events=split"
            )
        }
    }
}

/// Pick the single chart payload out of the envelope, mapping Yahoo's error
/// object to a provider error.
fn chart_data(symbol: &str, chart: ChartResult) -> Result<ChartData, ProviderError> {
    match (chart.result, chart.error) {
        (Some(results), _) => results
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ResponseFormatChanged("result array is empty".into())),
        (None, Some(err)) if err.code == "Not Found" => Err(ProviderError::SymbolNotFound {
            symbol: symbol.to_string(),
        }),
        (None, Some(err)) => Err(ProviderError::ResponseFormatChanged(format!(
            "{}: {}",
            err.code, err.description
        ))),
        (None, None) => Err(ProviderError::ResponseFormatChanged(
            "empty result with no error".into(),
        )),
    }
}

fn cell<T: Copy>(column: &[Option<T>], i: usize) -> Option<T> {
    column.get(i).copied().flatten()
}

impl QuoteData {
    /// Bar for row `i`, or `None` when every OHLCV field is missing
    /// (holidays, halted sessions).
    fn bar_at(&self, i: usize, timestamp: NaiveDateTime) -> Option<Bar> {
        let prices = [
            cell(&self.open, i),
            cell(&self.high, i),
            cell(&self.low, i),
            cell(&self.close, i),
        ];
        let volume = cell(&self.volume, i);
        if volume.is_none() && prices.iter().all(Option::is_none) {
            return None;
        }

        let [open, high, low, close] = prices.map(|p| p.unwrap_or(f64::NAN));
        Some(Bar {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

/// Daily and coarser bars are stamped at midnight of their UTC date.
fn bar_timestamp(epoch_secs: i64) -> Result<NaiveDateTime, ProviderError> {
    chrono::DateTime::from_timestamp(epoch_secs, 0)
        .map(|dt| dt.date_naive().and_time(NaiveTime::MIN))
        .ok_or_else(|| {
            ProviderError::ResponseFormatChanged(format!("invalid timestamp: {epoch_secs}"))
        })
}

fn parse_response(symbol: &str, resp: ChartResponse) -> Result<PriceSeries, ProviderError> {
    let data = chart_data(symbol, resp.chart)?;

    // Yahoo omits `timestamp` entirely for tickers with no trading history.
    let Some(timestamps) = data.timestamp else {
        return Ok(PriceSeries::empty());
    };
    let quote = data
        .indicators
        .quote
        .first()
        .ok_or_else(|| ProviderError::ResponseFormatChanged("no quote data".into()))?;

    let bars = timestamps
        .iter()
        .enumerate()
        .map(|(i, &ts)| -> Result<Option<Bar>, ProviderError> {
            Ok(quote.bar_at(i, bar_timestamp(ts)?))
        })
        .filter_map(Result::transpose)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PriceSeries::from_unsorted(bars))
}

/// How a failed attempt affects the retry loop.
#[derive(Debug)]
enum Failure {
    /// IP ban: trip the breaker and stop.
    Banned,
    /// Counts toward the breaker threshold and is retried.
    Transient(ProviderError),
    /// Returned as is.
    Fatal(ProviderError),
}

/// Map a non-success HTTP status to a [`Failure`]; `None` for 2xx.
fn classify_status(status: u16, retry_after: Option<u64>, symbol: &str) -> Option<Failure> {
    let failure = match status {
        200..=299 => return None,
        403 => Failure::Banned,
        429 => Failure::Transient(ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(60),
        }),
        401 => Failure::Fatal(ProviderError::AuthenticationRequired(
            "Yahoo Finance requires authentication".into(),
        )),
        // Unknown symbols come back as 404 with a chart error body.
        404 => Failure::Fatal(ProviderError::SymbolNotFound {
            symbol: symbol.to_string(),
        }),
        500..=599 => Failure::Transient(ProviderError::Other(format!(
            "HTTP {status} for {symbol}"
        ))),
        _ => Failure::Fatal(ProviderError::Other(format!("HTTP {status} for {symbol}"))),
    };
    Some(failure)
}

fn classify_send_error(err: reqwest::Error) -> Failure {
    let unreachable = ProviderError::NetworkUnreachable(err.to_string());
    if err.is_connect() || err.is_timeout() {
        Failure::Transient(unreachable)
    } else {
        Failure::Fatal(unreachable)
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`,
/// capped at [`MAX_BACKOFF`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_BACKOFF)
}

impl YahooClient {
    fn tripped(&self) -> ProviderError {
        ProviderError::CircuitBreakerTripped {
            retry_after_secs: self.circuit_breaker.remaining_cooldown().as_secs(),
        }
    }

    /// One request. `Ok` carries the parsed series; `Err` says how to go on.
    fn attempt(&self, symbol: &str, url: &str) -> Result<PriceSeries, Failure> {
        debug!(symbol, url, "requesting chart");
        let resp = self.client.get(url).send().map_err(classify_send_error)?;

        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(failure) = classify_status(resp.status().as_u16(), retry_after, symbol) {
            return Err(failure);
        }

        let chart: ChartResponse = resp.json().map_err(|e| {
            Failure::Fatal(ProviderError::ResponseFormatChanged(format!(
                "failed to parse response for {symbol}: {e}"
            )))
        })?;
        parse_response(symbol, chart).map_err(Failure::Fatal)
    }

    /// Run [`attempt`](Self::attempt) until it succeeds, fails for good, the
    /// retries run out or the breaker opens.
    fn fetch_with_retry(&self, symbol: &str, url: &str) -> Result<PriceSeries, ProviderError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.base_delay, attempt);
                warn!(symbol, attempt, delay_ms = delay.as_millis() as u64, "retrying fetch");
                std::thread::sleep(delay);
            }
            if !self.circuit_breaker.is_allowed() {
                return Err(self.tripped());
            }

            match self.attempt(symbol, url) {
                Ok(series) => {
                    self.circuit_breaker.record_success();
                    return Ok(series);
                }
                Err(Failure::Banned) => {
                    self.circuit_breaker.trip();
                    return Err(self.tripped());
                }
                Err(Failure::Fatal(err)) => return Err(err),
                Err(Failure::Transient(err)) => {
                    self.circuit_breaker.record_failure();
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Other("max retries exceeded".into())))
    }
}
