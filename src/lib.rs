pub mod benchmark;
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod report;
pub mod sse;
pub mod tokenizer;

pub use benchmark::{BenchmarkResult, BenchmarkRunner, measure_stream, run};
pub use cli::Cli;
pub use client::{ChatCompletionChunk, ClientConfig, ClientError, OpenAIClient};
pub use clock::{ManualClock, SystemClock, TimeSource};
pub use config::Config;
pub use report::BenchmarkReport;
pub use tokenizer::Tokenizer;
