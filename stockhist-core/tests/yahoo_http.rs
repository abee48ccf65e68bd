//! Yahoo provider retry, status mapping and circuit breaker behaviour against
//! a local mock HTTP server.

use httpmock::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use stockhist_core::data::{
    BreakerState, CircuitBreaker, DataProvider, ProviderError, TickerHandle, YahooProvider,
    YahooSettings,
};
use stockhist_core::domain::{Interval, PriceSeries, Ticker};

const CHART_BODY: &str = r#"{"chart":{"result":[{
    "timestamp":[1704205800,1704292200],
    "indicators":{"quote":[{
        "open":[187.15,184.22],
        "high":[188.44,185.88],
        "low":[183.89,183.43],
        "close":[185.64,184.25],
        "volume":[82488700,58414500]
    }]}
}],"error":null}}"#;

struct Harness {
    breaker: Arc<CircuitBreaker>,
    handle: Box<dyn TickerHandle>,
}

fn harness(server: &MockServer, max_retries: u32, failure_threshold: u32) -> Harness {
    let breaker = Arc::new(CircuitBreaker::new(
        Duration::from_secs(60),
        failure_threshold,
    ));
    let provider = YahooProvider::new(
        YahooSettings {
            base_url: server.base_url(),
            max_retries,
            base_delay: Duration::ZERO,
            ..YahooSettings::default()
        },
        Arc::clone(&breaker),
    )
    .unwrap();
    let handle = provider.open(&Ticker::parse("AAPL").unwrap());
    Harness { breaker, handle }
}

impl Harness {
    fn fetch(&self) -> Result<PriceSeries, ProviderError> {
        self.handle.history(Interval::Day, None, None)
    }

    fn is_open(&self) -> bool {
        matches!(self.breaker.state(), BreakerState::Open { .. })
    }
}

#[test]
fn success_parses_chart() {
    let server = MockServer::start();
    let chart = server.mock(|when, then| {
        when.method(GET)
            .path("/AAPL")
            .query_param("range", "max")
            .query_param("interval", "1d");
        then.status(200)
            .header("content-type", "application/json")
            .body(CHART_BODY);
    });
    let h = harness(&server, 3, 3);

    let series = h.fetch().unwrap();

    assert_eq!(series.len(), 2);
    assert_eq!(series.bars()[0].volume, Some(82_488_700));
    assert_eq!(chart.hits(), 1);
    assert!(!h.is_open());
}

#[test]
fn forbidden_trips_breaker_immediately() {
    let server = MockServer::start();
    let banned = server.mock(|when, then| {
        when.method(GET).path("/AAPL");
        then.status(403);
    });
    let h = harness(&server, 5, 3);

    let err = h.fetch().unwrap_err();

    assert!(matches!(
        err,
        ProviderError::CircuitBreakerTripped { retry_after_secs } if retry_after_secs > 0
    ));
    assert_eq!(banned.hits(), 1);
    assert!(h.is_open());
}

#[test]
fn rate_limit_is_retried_until_retries_run_out() {
    let server = MockServer::start();
    let limited = server.mock(|when, then| {
        when.method(GET).path("/AAPL");
        then.status(429).header("retry-after", "7");
    });
    let h = harness(&server, 2, 10);

    let err = h.fetch().unwrap_err();

    assert!(matches!(
        err,
        ProviderError::RateLimited { retry_after_secs: 7 }
    ));
    assert_eq!(limited.hits(), 3);
    assert!(!h.is_open());
}

#[test]
fn server_errors_stop_once_breaker_opens() {
    let server = MockServer::start();
    let failing = server.mock(|when, then| {
        when.method(GET).path("/AAPL");
        then.status(503);
    });
    let h = harness(&server, 5, 3);

    let err = h.fetch().unwrap_err();

    assert!(matches!(err, ProviderError::CircuitBreakerTripped { .. }));
    assert_eq!(failing.hits(), 3);
    assert!(h.is_open());

    // Refused without another request while open.
    assert!(h.fetch().is_err());
    assert_eq!(failing.hits(), 3);
}

#[test]
fn not_found_maps_to_symbol_not_found_without_retry() {
    let server = MockServer::start();
    let missing = server.mock(|when, then| {
        when.method(GET).path("/AAPL");
        then.status(404)
            .header("content-type", "application/json")
            .body(r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#);
    });
    let h = harness(&server, 3, 3);

    let err = h.fetch().unwrap_err();

    assert!(matches!(err, ProviderError::SymbolNotFound { ref symbol } if symbol == "AAPL"));
    assert_eq!(missing.hits(), 1);
    assert!(!h.is_open());
}

#[test]
fn unauthorized_maps_to_authentication_required() {
    let server = MockServer::start();
    let auth = server.mock(|when, then| {
        when.method(GET).path("/AAPL");
        then.status(401);
    });
    let h = harness(&server, 3, 3);

    let err = h.fetch().unwrap_err();

    assert!(matches!(err, ProviderError::AuthenticationRequired(_)));
    assert_eq!(auth.hits(), 1);
    assert!(!h.is_open());
}

#[test]
fn malformed_body_is_format_change() {
    let server = MockServer::start();
    let garbled = server.mock(|when, then| {
        when.method(GET).path("/AAPL");
        then.status(200).body("<html>consent</html>");
    });
    let h = harness(&server, 3, 3);

    let err = h.fetch().unwrap_err();

    assert!(matches!(err, ProviderError::ResponseFormatChanged(_)));
    assert_eq!(garbled.hits(), 1);
}

#[test]
fn connect_errors_are_retried_and_counted() {
    let breaker = Arc::new(CircuitBreaker::new(Duration::from_secs(60), 3));
    let provider = YahooProvider::new(
        YahooSettings {
            base_url: "http://127.0.0.1:9".into(),
            max_retries: 5,
            base_delay: Duration::ZERO,
            ..YahooSettings::default()
        },
        Arc::clone(&breaker),
    )
    .unwrap();
    let handle = provider.open(&Ticker::parse("AAPL").unwrap());

    let err = handle.history(Interval::Day, None, None).unwrap_err();

    // Three refused connections open the breaker before retries run out.
    assert!(matches!(err, ProviderError::CircuitBreakerTripped { .. }));
    assert!(!provider.is_available());
}

#[test]
fn large_retry_count_does_not_overflow_backoff() {
    let breaker = Arc::new(CircuitBreaker::new(Duration::from_secs(60), 100));
    let provider = YahooProvider::new(
        YahooSettings {
            base_url: "http://127.0.0.1:9".into(),
            max_retries: 40,
            base_delay: Duration::ZERO,
            ..YahooSettings::default()
        },
        breaker,
    )
    .unwrap();
    let handle = provider.open(&Ticker::parse("AAPL").unwrap());

    let err = handle.history(Interval::Day, None, None).unwrap_err();

    assert!(matches!(err, ProviderError::NetworkUnreachable(_)));
}
