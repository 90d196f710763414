use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::{debug, trace};
use std::time::{Duration, Instant};

use crate::client::{
    ChatCompletionChunk, ClientConfig, ClientError, DONE_SENTINEL, OpenAIClient, Usage,
};
use crate::clock::TimeSource;
use crate::metrics::{ErrorType, Metrics};
use crate::sse::SseDecoder;

/// Measurements of one streamed completion.
///
/// Built once the stream has closed and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkResult {
    /// Prompt size as supplied by the caller
    pub input_tokens: usize,
    /// Number of events whose delta carried non-empty content
    pub output_tokens: usize,
    /// Request start to first content-bearing event. Zero when no content
    /// arrived.
    pub ttft: Duration,
    /// Mean gap between content events after the first: the span from the
    /// first to the last content event divided by `output_tokens - 1`. Zero
    /// with fewer than two content events.
    pub inter_token_latency: Duration,
    /// `output_tokens / total_elapsed`, in tokens per second. Zero when either
    /// is zero.
    pub throughput: f64,
    /// Request start to stream termination
    pub total_elapsed: Duration,
    /// Events whose delta carried reasoning text. Not output tokens.
    pub reasoning_events: usize,
    /// Token usage the server reported, if it sent any
    pub server_usage: Option<Usage>,
    /// Last finish reason reported by the server
    pub finish_reason: Option<String>,
    /// Concatenated content fragments
    pub text: String,
}

impl BenchmarkResult {
    pub fn total_tokens(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// Runs a single streaming request and times it.
///
/// # Examples
///
/// ```no_run
/// use ttft_bench::client::ClientConfig;
/// use ttft_bench::{BenchmarkRunner, SystemClock};
///
/// # async fn example() -> Result<(), ttft_bench::ClientError> {
/// let config = ClientConfig::new("http://localhost:8000/v1", None, "llama-3.1-8b");
/// let runner = BenchmarkRunner::new(config)?;
/// let result = runner.run("Thank you.", 3, &SystemClock).await?;
/// println!("TTFT: {:?}", result.ttft);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BenchmarkRunner {
    client: OpenAIClient,
}

impl BenchmarkRunner {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Ok(Self::with_client(OpenAIClient::new(config)?))
    }

    pub fn with_client(client: OpenAIClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &OpenAIClient {
        &self.client
    }

    /// Send `prompt`, consume the response stream and measure it against
    /// `clock`.
    ///
    /// Fails if the request cannot be sent, the server answers with a
    /// non-success status, the body breaks off, or an event does not decode.
    /// No partial result is produced in any of those cases.
    pub async fn run<T>(
        &self,
        prompt: &str,
        input_tokens: usize,
        clock: &T,
    ) -> Result<BenchmarkResult, ClientError>
    where
        T: TimeSource + ?Sized,
    {
        Metrics::record_request_sent();

        let outcome = self.execute(prompt, input_tokens, clock).await;

        match &outcome {
            Ok(result) => {
                debug!(
                    "Request completed - input_tokens: {}, output_tokens: {}, ttft_ms: {:.1}, itl_ms: {:.1}, total_ms: {:.1}",
                    result.input_tokens,
                    result.output_tokens,
                    result.ttft.as_secs_f64() * 1000.0,
                    result.inter_token_latency.as_secs_f64() * 1000.0,
                    result.total_elapsed.as_secs_f64() * 1000.0
                );
                Metrics::record_success(result);
            }
            Err(e) => {
                debug!("Request failed: {}", e);
                Metrics::record_failure(ErrorType::from(e));
            }
        }

        outcome
    }

    async fn execute<T>(
        &self,
        prompt: &str,
        input_tokens: usize,
        clock: &T,
    ) -> Result<BenchmarkResult, ClientError>
    where
        T: TimeSource + ?Sized,
    {
        let request = self.client.create_request(prompt);

        let start = clock.now();
        let response = self.client.open_stream(&request).await?;

        measure_stream(start, response.bytes_stream(), input_tokens, clock).await
    }
}

/// Benchmark one prompt against `endpoint` with a fresh client.
pub async fn run<T>(
    endpoint: &str,
    api_key: &str,
    model: &str,
    prompt: &str,
    input_tokens: usize,
    clock: &T,
) -> Result<BenchmarkResult, ClientError>
where
    T: TimeSource + ?Sized,
{
    BenchmarkRunner::new(ClientConfig::new(endpoint, Some(api_key), model))?
        .run(prompt, input_tokens, clock)
        .await
}

/// Consume an SSE body and measure it relative to `start`.
///
/// Events are handled strictly in arrival order. Reading stops at the
/// `[DONE]` sentinel or when `body` ends; the body is dropped before this
/// returns, whatever the outcome.
pub async fn measure_stream<S, E, T>(
    start: Instant,
    body: S,
    input_tokens: usize,
    clock: &T,
) -> Result<BenchmarkResult, ClientError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
    T: TimeSource + ?Sized,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = SseDecoder::new();
    let mut tally = StreamTally::default();

    'read: loop {
        let (payloads, end_of_input) = match body.next().await {
            Some(Ok(chunk)) => (decoder.feed(&chunk)?, false),
            Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
            None => (decoder.finish()?.into_iter().collect(), true),
        };

        for payload in payloads {
            if payload.trim() == DONE_SENTINEL {
                trace!("received stream sentinel");
                break 'read;
            }
            let chunk: ChatCompletionChunk =
                serde_json::from_str(&payload).map_err(|source| ClientError::Decode {
                    payload,
                    source: source.into(),
                })?;
            tally.observe(&chunk, start, clock);
        }

        if end_of_input {
            debug!("stream closed without sentinel");
            break;
        }
    }

    let total_elapsed = clock.since(start);
    Ok(tally.finish(input_tokens, total_elapsed))
}

/// Running counters for one stream.
#[derive(Debug, Default)]
struct StreamTally {
    output_tokens: usize,
    /// Arrival of the first content event, i.e. the TTFT
    ttft: Option<Duration>,
    last_content_at: Option<Duration>,
    reasoning_events: usize,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    text: String,
}

impl StreamTally {
    fn observe<T>(&mut self, chunk: &ChatCompletionChunk, start: Instant, clock: &T)
    where
        T: TimeSource + ?Sized,
    {
        if let Some(content) = chunk.content() {
            let arrived = clock.since(start);
            if self.ttft.is_none() {
                debug!("first token after {:.1}ms", arrived.as_secs_f64() * 1000.0);
                self.ttft = Some(arrived);
            }
            self.last_content_at = Some(arrived);
            self.output_tokens += 1;
            self.text.push_str(content);
        } else if chunk.reasoning().is_some() {
            self.reasoning_events += 1;
        }

        if let Some(usage) = chunk.usage {
            trace!("server reported usage: {:?}", usage);
            self.usage = Some(usage);
        }

        if let Some(reason) = chunk.finish_reason() {
            self.finish_reason = Some(reason.to_string());
        }
    }

    fn finish(self, input_tokens: usize, total_elapsed: Duration) -> BenchmarkResult {
        let secs = total_elapsed.as_secs_f64();
        let throughput = if self.output_tokens > 0 && secs > 0.0 {
            self.output_tokens as f64 / secs
        } else {
            0.0
        };

        let inter_token_latency = match (self.ttft, self.last_content_at) {
            (Some(first), Some(last)) if self.output_tokens > 1 => {
                let gaps = u32::try_from(self.output_tokens - 1).unwrap_or(u32::MAX);
                last.saturating_sub(first) / gaps
            }
            _ => Duration::ZERO,
        };

        BenchmarkResult {
            input_tokens,
            output_tokens: self.output_tokens,
            ttft: self.ttft.unwrap_or_default(),
            inter_token_latency,
            throughput,
            total_elapsed,
            reasoning_events: self.reasoning_events,
            server_usage: self.usage,
            finish_reason: self.finish_reason,
            text: self.text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DecodeError, Delta, StreamChoice};
    use crate::sse::{MAX_FRAME_LEN, SseError};
    use crate::clock::{ManualClock, SystemClock};
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};

    const STEP: Duration = Duration::from_millis(66);

    fn role_chunk() -> ChatCompletionChunk {
        chunk(Some("assistant"), None, None)
    }

    fn content_chunk(content: &str) -> ChatCompletionChunk {
        chunk(None, Some(content), None)
    }

    fn finish_chunk() -> ChatCompletionChunk {
        chunk(None, None, Some("stop"))
    }

    fn chunk(
        role: Option<&str>,
        content: Option<&str>,
        finish_reason: Option<&str>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            choices: vec![StreamChoice {
                index: 0,
                delta: Delta {
                    role: role.map(str::to_string),
                    content: content.map(str::to_string),
                    ..Default::default()
                },
                finish_reason: finish_reason.map(str::to_string),
            }],
            ..Default::default()
        }
    }

    fn frame(chunk: &ChatCompletionChunk) -> String {
        format!("data: {}\n\n", serde_json::to_string(chunk).unwrap())
    }

    fn done_frame() -> String {
        format!("data: {}\n\n", DONE_SENTINEL)
    }

    /// The "You're welcome." response used throughout: role, four content
    /// deltas, then an empty finish marker.
    fn welcome_frames() -> Vec<String> {
        vec![
            frame(&role_chunk()),
            frame(&content_chunk("You")),
            frame(&content_chunk("'re")),
            frame(&content_chunk(" welcome")),
            frame(&content_chunk(".")),
            frame(&finish_chunk()),
        ]
    }

    /// A body that hands out one network chunk per poll, first advancing
    /// `clock` by the delay paired with that chunk.
    fn timed_body(
        clock: Arc<ManualClock>,
        chunks: Vec<(Duration, String)>,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> {
        futures::stream::iter(chunks).map(move |(delay, chunk)| {
            clock.advance(delay);
            Ok(Bytes::from(chunk))
        })
    }

    /// Every chunk after the first arrives `step` after its predecessor.
    fn evenly_spaced(frames: Vec<String>, step: Duration) -> Vec<(Duration, String)> {
        frames
            .into_iter()
            .enumerate()
            .map(|(i, f)| (if i == 0 { Duration::ZERO } else { step }, f))
            .collect()
    }

    #[tokio::test]
    async fn test_welcome_stream_timings() {
        let clock = Arc::new(ManualClock::new());
        let mut frames = welcome_frames();
        frames.push(done_frame());

        let start = clock.now();
        let body = timed_body(Arc::clone(&clock), evenly_spaced(frames, STEP));
        let result = measure_stream(start, body, 3, clock.as_ref()).await.unwrap();

        assert_eq!(result.input_tokens, 3);
        assert_eq!(result.output_tokens, 5);
        assert_eq!(result.ttft, Duration::from_millis(66));
        assert_eq!(result.inter_token_latency, Duration::from_millis(66));
        assert_eq!(result.total_elapsed, Duration::from_millis(396));
        assert!((result.throughput - 5.0 / 0.396).abs() < 0.01);
        assert!((result.throughput - 12.63).abs() < 0.01);
        assert_eq!(result.text, "You're welcome.");
        assert_eq!(result.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_ttft_is_delay_before_single_content_event() {
        let clock = Arc::new(ManualClock::new());
        let delay = Duration::from_millis(66);
        let chunks = vec![
            (Duration::ZERO, frame(&role_chunk())),
            (delay, frame(&content_chunk("You"))),
            (Duration::ZERO, frame(&finish_chunk())),
            (Duration::ZERO, done_frame()),
        ];

        let start = clock.now();
        let result = measure_stream(start, timed_body(Arc::clone(&clock), chunks), 3, &clock)
            .await
            .unwrap();

        assert_eq!(result.ttft, delay);
        assert_eq!(result.output_tokens, 1);
        assert_eq!(result.input_tokens, 3);
        assert_eq!(result.inter_token_latency, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_ttft_not_included_in_inter_token_latency() {
        let clock = Arc::new(ManualClock::new());
        let gap = Duration::from_millis(100);
        let chunks = vec![
            (Duration::ZERO, frame(&role_chunk())),
            (Duration::from_millis(1000), frame(&content_chunk("a"))),
            (gap, frame(&content_chunk("b"))),
            (gap, frame(&content_chunk("c"))),
            (Duration::ZERO, frame(&finish_chunk())),
            (Duration::ZERO, done_frame()),
        ];

        let start = clock.now();
        let result = measure_stream(start, timed_body(Arc::clone(&clock), chunks), 0, &clock)
            .await
            .unwrap();

        assert_eq!(result.ttft, Duration::from_millis(1000));
        assert_eq!(result.inter_token_latency, gap);
        assert_eq!(result.total_elapsed, Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn test_inter_token_latency_averages_uneven_gaps() {
        let clock = Arc::new(ManualClock::new());
        let chunks = vec![
            (Duration::from_millis(10), frame(&content_chunk("a"))),
            (Duration::from_millis(20), frame(&content_chunk("b"))),
            (Duration::from_millis(40), frame(&content_chunk("c"))),
            (Duration::from_millis(500), frame(&finish_chunk())),
        ];

        let start = clock.now();
        let result = measure_stream(start, timed_body(Arc::clone(&clock), chunks), 0, &clock)
            .await
            .unwrap();

        // Trailing non-content events do not stretch the window
        assert_eq!(result.inter_token_latency, Duration::from_millis(30));
        assert_eq!(result.total_elapsed, Duration::from_millis(570));
    }

    #[tokio::test]
    async fn test_inter_token_latency_zero_without_two_tokens() {
        let clock = Arc::new(ManualClock::new());
        let chunks = evenly_spaced(
            vec![frame(&role_chunk()), frame(&finish_chunk()), done_frame()],
            STEP,
        );

        let start = clock.now();
        let result = measure_stream(start, timed_body(Arc::clone(&clock), chunks), 0, &clock)
            .await
            .unwrap();
        assert_eq!(result.output_tokens, 0);
        assert_eq!(result.inter_token_latency, Duration::ZERO);

        // Two tokens in the same instant leave a zero window
        let clock = ManualClock::new();
        let body = futures::stream::iter(vec![Ok::<_, Infallible>(Bytes::from(format!(
            "{}{}",
            frame(&content_chunk("a")),
            frame(&content_chunk("b"))
        )))]);
        let result = measure_stream(clock.now(), body, 0, &clock).await.unwrap();
        assert_eq!(result.output_tokens, 2);
        assert_eq!(result.inter_token_latency, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_reasoning_deltas_are_not_output_tokens() {
        let clock = Arc::new(ManualClock::new());
        let chunks = vec![
            (
                Duration::from_millis(30),
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"reasoning_content\":\"Let me\"}}]}\n\n"
                    .to_string(),
            ),
            (
                Duration::from_millis(30),
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"reasoning\":\" think\"}}]}\n\n"
                    .to_string(),
            ),
            (Duration::from_millis(40), frame(&content_chunk("Hi"))),
            (Duration::ZERO, done_frame()),
        ];

        let start = clock.now();
        let result = measure_stream(start, timed_body(Arc::clone(&clock), chunks), 0, &clock)
            .await
            .unwrap();

        assert_eq!(result.reasoning_events, 2);
        assert_eq!(result.output_tokens, 1);
        assert_eq!(result.ttft, Duration::from_millis(100));
        assert_eq!(result.text, "Hi");
    }

    #[tokio::test]
    async fn test_server_usage_is_kept_apart_from_counted_tokens() {
        let clock = ManualClock::new();
        let body = format!(
            "{}{}data: {}\n\n{}",
            frame(&content_chunk("a")),
            frame(&content_chunk("b")),
            r#"{"choices":[],"usage":{"prompt_tokens":4,"completion_tokens":6,"total_tokens":10}}"#,
            done_frame()
        );
        let body = futures::stream::iter(vec![Ok::<_, Infallible>(Bytes::from(body))]);

        let result = measure_stream(clock.now(), body, 3, &clock).await.unwrap();

        assert_eq!(result.output_tokens, 2);
        assert_eq!(result.input_tokens, 3);
        let usage = result.server_usage.unwrap();
        assert_eq!(usage.prompt_tokens, 4);
        assert_eq!(usage.completion_tokens, 6);
        assert_eq!(usage.total_tokens, 10);
    }

    #[tokio::test]
    async fn test_ttft_captured_at_first_content_only() {
        let clock = Arc::new(ManualClock::new());
        let chunks = vec![
            (Duration::from_millis(10), frame(&content_chunk("a"))),
            (Duration::from_millis(20), frame(&content_chunk("b"))),
            (Duration::from_millis(1), frame(&content_chunk("c"))),
        ];

        let start = clock.now();
        let result = measure_stream(start, timed_body(Arc::clone(&clock), chunks), 0, &clock)
            .await
            .unwrap();

        assert_eq!(result.ttft, Duration::from_millis(10));
        assert_eq!(result.total_elapsed, Duration::from_millis(31));
        assert_eq!(result.output_tokens, 3);
    }

    #[tokio::test]
    async fn test_throughput_uses_total_elapsed() {
        for k in [1usize, 4, 9] {
            let clock = Arc::new(ManualClock::new());
            let delay = Duration::from_millis(25);
            let chunks = (0..k)
                .map(|i| (delay, frame(&content_chunk(&i.to_string()))))
                .collect();

            let start = clock.now();
            let result =
                measure_stream(start, timed_body(Arc::clone(&clock), chunks), 7, &clock)
                    .await
                    .unwrap();

            let expected_total = delay * k as u32;
            assert_eq!(result.output_tokens, k);
            assert_eq!(result.ttft, delay);
            assert_eq!(result.total_elapsed, expected_total);
            let expected = k as f64 / expected_total.as_secs_f64();
            assert!((result.throughput - expected).abs() < 1e-9);
            assert!(result.ttft <= result.total_elapsed);
        }
    }

    #[tokio::test]
    async fn test_structural_events_are_not_tokens() {
        let clock = Arc::new(ManualClock::new());
        let empty_content = frame(&content_chunk(""));
        let no_choices = "data: {\"choices\":[]}\n\n".to_string();
        let chunks = evenly_spaced(
            vec![
                frame(&role_chunk()),
                empty_content,
                no_choices,
                frame(&finish_chunk()),
                done_frame(),
            ],
            STEP,
        );

        let start = clock.now();
        let result = measure_stream(start, timed_body(Arc::clone(&clock), chunks), 3, &clock)
            .await
            .unwrap();

        assert_eq!(result.output_tokens, 0);
        assert_eq!(result.ttft, Duration::ZERO);
        assert_eq!(result.throughput, 0.0);
        assert_eq!(result.total_elapsed, STEP * 4);
        assert_eq!(result.input_tokens, 3);
        assert!(result.text.is_empty());
    }

    #[tokio::test]
    async fn test_zero_elapsed_does_not_divide() {
        let clock = ManualClock::new();
        let body = futures::stream::iter(vec![Ok::<_, Infallible>(Bytes::from(frame(
            &content_chunk("hi"),
        )))]);

        let result = measure_stream(clock.now(), body, 1, &clock).await.unwrap();

        assert_eq!(result.output_tokens, 1);
        assert_eq!(result.total_elapsed, Duration::ZERO);
        assert_eq!(result.throughput, 0.0);
    }

    #[tokio::test]
    async fn test_input_tokens_are_passed_through() {
        let clock = ManualClock::new();
        let mut frames = welcome_frames();
        frames.push(done_frame());
        let body = futures::stream::iter(
            frames
                .into_iter()
                .map(|f| Ok::<_, Infallible>(Bytes::from(f))),
        );

        let result = measure_stream(clock.now(), body, 4096, &clock).await.unwrap();

        assert_eq!(result.input_tokens, 4096);
        assert_eq!(result.total_tokens(), 4096 + 5);
    }

    #[tokio::test]
    async fn test_frames_split_across_network_chunks() {
        let clock = ManualClock::new();
        let mut whole: String = welcome_frames().concat();
        whole.push_str(&done_frame());

        // Cut the body into 7-byte pieces regardless of frame boundaries
        let pieces: Vec<Result<Bytes, Infallible>> = whole
            .as_bytes()
            .chunks(7)
            .map(|piece| Ok(Bytes::copy_from_slice(piece)))
            .collect();

        let result = measure_stream(clock.now(), futures::stream::iter(pieces), 3, &clock)
            .await
            .unwrap();

        assert_eq!(result.output_tokens, 5);
        assert_eq!(result.text, "You're welcome.");
    }

    #[tokio::test]
    async fn test_sentinel_stops_reading() {
        let clock = ManualClock::new();
        let polled = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&polled);
        let chunks = vec![
            format!("{}{}", frame(&content_chunk("a")), done_frame()),
            "data: this is not json\n\n".to_string(),
        ];
        let body = futures::stream::iter(chunks).map(move |c| {
            *counter.lock().unwrap() += 1;
            Ok::<_, Infallible>(Bytes::from(c))
        });

        let result = measure_stream(clock.now(), body, 0, &clock).await.unwrap();

        assert_eq!(result.output_tokens, 1);
        assert_eq!(*polled.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stream_ends_without_sentinel() {
        let clock = ManualClock::new();
        // Last frame lacks its blank line terminator
        let body = format!(
            "{}data: {}",
            frame(&content_chunk("a")),
            serde_json::to_string(&content_chunk("b")).unwrap()
        );
        let body = futures::stream::iter(vec![Ok::<_, Infallible>(Bytes::from(body))]);

        let result = measure_stream(clock.now(), body, 0, &clock).await.unwrap();

        assert_eq!(result.output_tokens, 2);
    }

    #[tokio::test]
    async fn test_malformed_event_aborts_run() {
        let clock = Arc::new(ManualClock::new());
        let chunks = evenly_spaced(
            vec![
                frame(&role_chunk()),
                frame(&content_chunk("You")),
                "data: {\"choices\": [oops\n\n".to_string(),
                frame(&content_chunk("'re")),
                done_frame(),
            ],
            STEP,
        );

        let start = clock.now();
        let err = measure_stream(start, timed_body(Arc::clone(&clock), chunks), 3, &clock)
            .await
            .unwrap_err();

        match err {
            ClientError::Decode { payload, .. } => assert_eq!(payload, "{\"choices\": [oops"),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_event_aborts_run() {
        let clock = ManualClock::new();
        let mut bad = b"data: {\"choices\":[{\"delta\":{\"content\":\"\xff\xfe\"}}]}\n\n".to_vec();
        bad.extend_from_slice(done_frame().as_bytes());
        let body = futures::stream::iter(vec![
            Ok::<_, Infallible>(Bytes::from(frame(&content_chunk("ok")))),
            Ok(Bytes::from(bad)),
        ]);

        let err = measure_stream(clock.now(), body, 0, &clock)
            .await
            .unwrap_err();

        match err {
            ClientError::Decode {
                source: DecodeError::Frame(SseError::InvalidUtf8 { .. }),
                ..
            } => {}
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_utf8_character_split_across_network_chunks() {
        let clock = ManualClock::new();
        let whole = frame(&content_chunk("caf\u{e9}"));
        let split = whole.as_bytes().iter().position(|&b| b == 0xc3).unwrap() + 1;
        let body = futures::stream::iter(vec![
            Ok::<_, Infallible>(Bytes::copy_from_slice(&whole.as_bytes()[..split])),
            Ok(Bytes::copy_from_slice(&whole.as_bytes()[split..])),
        ]);

        let result = measure_stream(clock.now(), body, 0, &clock).await.unwrap();

        assert_eq!(result.text, "caf\u{e9}");
    }

    #[tokio::test]
    async fn test_oversized_frame_aborts_run() {
        let clock = ManualClock::new();
        // A line that never ends
        let filler = Bytes::from(vec![b'x'; 64 * 1024]);
        let body = futures::stream::iter(
            std::iter::once(Bytes::from_static(b"data: "))
                .chain(std::iter::repeat(filler).take(MAX_FRAME_LEN / (64 * 1024) + 1))
                .map(Ok::<_, Infallible>),
        );

        let err = measure_stream(clock.now(), body, 0, &clock)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::Decode {
                source: DecodeError::Frame(SseError::FrameTooLarge { .. }),
                ..
            }
        ));
        assert!(err.is_run_failure());
    }

    #[tokio::test]
    async fn test_transport_error_mid_stream() {
        let clock = ManualClock::new();
        let body = futures::stream::iter(vec![
            Ok(Bytes::from(frame(&content_chunk("a")))),
            Err("connection reset by peer"),
        ]);

        let err = measure_stream(clock.now(), body, 0, &clock)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Transport(ref msg) if msg.contains("reset")));
        assert!(!err.is_request_error());
    }

    // End-to-end tests against a local HTTP server

    type Captured = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

    async fn spawn_server(status: warp::http::StatusCode, body: String) -> (String, Captured) {
        use warp::Filter;

        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);

        let route = warp::post()
            .and(warp::path!("v1" / "chat" / "completions"))
            .and(warp::header::optional::<String>("authorization"))
            .and(warp::body::json())
            .map(move |auth: Option<String>, request: serde_json::Value| {
                sink.lock().unwrap().push((auth, request));
                warp::http::Response::builder()
                    .status(status)
                    .header("content-type", "text/event-stream")
                    .body(body.clone())
                    .unwrap()
            });

        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        (format!("http://{}/v1", addr), captured)
    }

    #[tokio::test]
    async fn test_run_against_streaming_server() {
        let mut body = welcome_frames().concat();
        body.push_str(&done_frame());
        let (url, captured) = spawn_server(warp::http::StatusCode::OK, body).await;

        let result = run(&url, "test-key", "test-model", "Thank you.", 3, &SystemClock)
            .await
            .unwrap();

        assert_eq!(result.input_tokens, 3);
        assert_eq!(result.output_tokens, 5);
        assert!(result.ttft <= result.total_elapsed);
        assert!(result.throughput > 0.0);

        let requests = captured.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (auth, request) = &requests[0];
        assert_eq!(auth.as_deref(), Some("Bearer test-key"));
        assert_eq!(request["model"], "test-model");
        assert_eq!(request["stream"], true);
        assert_eq!(request["messages"][0]["role"], "user");
        assert_eq!(request["messages"][0]["content"], "Thank you.");
    }

    #[tokio::test]
    async fn test_run_with_frozen_clock_reports_zero_timings() {
        let mut body = welcome_frames().concat();
        body.push_str(&done_frame());
        let (url, _) = spawn_server(warp::http::StatusCode::OK, body).await;
        let clock = ManualClock::new();

        let result = run(&url, "test-key", "test-model", "Thank you.", 3, &clock)
            .await
            .unwrap();

        assert_eq!(result.output_tokens, 5);
        assert_eq!(result.ttft, Duration::ZERO);
        assert_eq!(result.total_elapsed, Duration::ZERO);
        assert_eq!(result.throughput, 0.0);
    }

    #[tokio::test]
    async fn test_server_error_status_fails_run() {
        let (url, _) =
            spawn_server(warp::http::StatusCode::INTERNAL_SERVER_ERROR, "boom".into()).await;

        let err = run(&url, "test-key", "test-model", "hi", 1, &SystemClock)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Http5xx { status: 500, ref message } if message == "boom"));
        assert!(err.is_request_error());
    }

    #[tokio::test]
    async fn test_connection_refused_fails_run() {
        // Reserve a port, then free it so nothing is listening there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("http://{}/v1", addr);
        let err = run(&url, "test-key", "test-model", "hi", 1, &SystemClock)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Connection(_)), "got {:?}", err);
        assert!(err.is_request_error());
    }

    #[tokio::test]
    async fn test_malformed_event_from_server_fails_run() {
        let body = format!(
            "{}{}data: not-json\n\n{}",
            frame(&role_chunk()),
            frame(&content_chunk("You")),
            done_frame()
        );
        let (url, _) = spawn_server(warp::http::StatusCode::OK, body).await;

        let err = run(&url, "test-key", "test-model", "hi", 1, &SystemClock)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Decode { .. }));
    }
}
