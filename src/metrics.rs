use metriken::{AtomicHistogram, Counter, LazyCounter, metric};
use std::time::Duration;

use crate::benchmark::BenchmarkResult;
use crate::client::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Connection,
    Http4xx(u16),
    Http5xx(u16),
    Timeout,
    Decode,
    Transport,
    Other,
}

impl From<&ClientError> for ErrorType {
    fn from(error: &ClientError) -> Self {
        match error {
            ClientError::Connection(_) => ErrorType::Connection,
            ClientError::Http4xx { status, .. } => ErrorType::Http4xx(*status),
            ClientError::Http5xx { status, .. } => ErrorType::Http5xx(*status),
            ClientError::Timeout(_) => ErrorType::Timeout,
            ClientError::Decode { .. } => ErrorType::Decode,
            ClientError::Transport(_) => ErrorType::Transport,
            ClientError::HttpStatus { .. } | ClientError::Other(_) => ErrorType::Other,
        }
    }
}

// Request metrics
#[metric(
    name = "requests",
    description = "Total number of requests",
    metadata = { status = "sent" }
)]
pub static REQUESTS_SENT: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "requests",
    description = "Successful requests",
    metadata = { status = "success" }
)]
pub static REQUESTS_SUCCESS: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "requests",
    description = "Failed requests",
    metadata = { status = "failed" }
)]
pub static REQUESTS_FAILED: LazyCounter = LazyCounter::new(Counter::default);

// Error category metrics
#[metric(
    name = "errors",
    description = "Connection errors",
    metadata = { "type" = "connection" }
)]
pub static ERRORS_CONNECTION: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "HTTP 4xx errors",
    metadata = { "type" = "http_4xx" }
)]
pub static ERRORS_HTTP_4XX: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "HTTP 5xx errors",
    metadata = { "type" = "http_5xx" }
)]
pub static ERRORS_HTTP_5XX: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "Timeouts",
    metadata = { "type" = "timeout" }
)]
pub static ERRORS_TIMEOUT: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "Stream events that failed to decode",
    metadata = { "type" = "decode" }
)]
pub static ERRORS_DECODE: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "Stream read failures after the response started",
    metadata = { "type" = "transport" }
)]
pub static ERRORS_TRANSPORT: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "Other errors",
    metadata = { "type" = "other" }
)]
pub static ERRORS_OTHER: LazyCounter = LazyCounter::new(Counter::default);

// Token metrics
#[metric(
    name = "tokens",
    description = "Input tokens sent",
    metadata = { direction = "input" }
)]
pub static TOKENS_INPUT: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "tokens",
    description = "Output tokens received",
    metadata = { direction = "output" }
)]
pub static TOKENS_OUTPUT: LazyCounter = LazyCounter::new(Counter::default);

// Latency metrics (in nanoseconds)
// Histogram parameters: (grouping_power=5, max_value_power=64)
#[metric(
    name = "ttft",
    description = "Time to first token in nanoseconds",
    metadata = { unit = "nanoseconds" }
)]
pub static TTFT: AtomicHistogram = AtomicHistogram::new(5, 64);

#[metric(
    name = "request_latency",
    description = "Total request latency in nanoseconds",
    metadata = { unit = "nanoseconds" }
)]
pub static REQUEST_LATENCY: AtomicHistogram = AtomicHistogram::new(5, 64);

#[metric(
    name = "itl",
    description = "Mean inter-token latency of a request in nanoseconds",
    metadata = { unit = "nanoseconds" }
)]
pub static INTER_TOKEN_LATENCY: AtomicHistogram = AtomicHistogram::new(5, 64);

pub struct Metrics;

impl Metrics {
    pub fn record_request_sent() {
        REQUESTS_SENT.increment();
    }

    /// TTFT is only recorded when content arrived, ITL only when at least
    /// two content events did.
    pub fn record_success(result: &BenchmarkResult) {
        REQUESTS_SUCCESS.increment();
        TOKENS_INPUT.add(result.input_tokens as u64);
        TOKENS_OUTPUT.add(result.output_tokens as u64);
        if result.output_tokens > 0 {
            let _ = TTFT.increment(nanos(result.ttft));
        }
        if result.output_tokens > 1 {
            let _ = INTER_TOKEN_LATENCY.increment(nanos(result.inter_token_latency));
        }
        let _ = REQUEST_LATENCY.increment(nanos(result.total_elapsed));
    }

    pub fn record_failure(error_type: ErrorType) {
        REQUESTS_FAILED.increment();
        match error_type {
            ErrorType::Connection => ERRORS_CONNECTION.increment(),
            ErrorType::Http4xx(_) => ERRORS_HTTP_4XX.increment(),
            ErrorType::Http5xx(_) => ERRORS_HTTP_5XX.increment(),
            ErrorType::Timeout => ERRORS_TIMEOUT.increment(),
            ErrorType::Decode => ERRORS_DECODE.increment(),
            ErrorType::Transport => ERRORS_TRANSPORT.increment(),
            ErrorType::Other => ERRORS_OTHER.increment(),
        };
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
