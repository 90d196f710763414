use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::io::Write;

use crate::benchmark::BenchmarkResult;
use crate::client::Usage;

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    // Metadata
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub endpoint: String,
    pub model: String,

    // Results
    pub tokens: TokenStats,
    pub latency: LatencyStats,
    pub output_tokens_per_second: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenStats {
    pub input: usize,
    pub output: usize,
    pub total: usize,
    pub reasoning_events: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyStats {
    /// Absent when the response carried no content
    pub ttft_ms: Option<f64>,
    /// Absent with fewer than two content events
    pub itl_ms: Option<f64>,
    pub total_ms: f64,
}

impl BenchmarkReport {
    pub fn new(endpoint: &str, model: &str, result: &BenchmarkResult, include_text: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            tokens: TokenStats {
                input: result.input_tokens,
                output: result.output_tokens,
                total: result.total_tokens(),
                reasoning_events: result.reasoning_events,
            },
            latency: LatencyStats {
                ttft_ms: (result.output_tokens > 0).then(|| millis(result.ttft)),
                itl_ms: (result.output_tokens > 1).then(|| millis(result.inter_token_latency)),
                total_ms: millis(result.total_elapsed),
            },
            output_tokens_per_second: result.throughput,
            server_usage: result.server_usage,
            finish_reason: result.finish_reason.clone(),
            text: include_text.then(|| result.text.clone()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human readable summary, one measurement per line.
    pub fn write_console<W: Write>(&self, out: &mut W) -> Result<()> {
        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, false);

        writeln!(out, "{} -----", timestamp)?;
        writeln!(out, "{} Endpoint: {} Model: {}", timestamp, self.endpoint, self.model)?;
        writeln!(
            out,
            "{} Tokens: Input: {} Output: {} Total: {}",
            timestamp, self.tokens.input, self.tokens.output, self.tokens.total
        )?;

        match self.latency.ttft_ms {
            Some(ttft) => writeln!(out, "{} TTFT (ms): {:.1}", timestamp, ttft)?,
            None => writeln!(out, "{} TTFT (ms): n/a (no content received)", timestamp)?,
        }
        if let Some(itl) = self.latency.itl_ms {
            writeln!(out, "{} ITL (ms): {:.1}", timestamp, itl)?;
        }

        writeln!(
            out,
            "{} Total Latency (ms): {:.1}",
            timestamp, self.latency.total_ms
        )?;
        writeln!(
            out,
            "{} Throughput: Output tokens/s: {:.2}",
            timestamp, self.output_tokens_per_second
        )?;

        if self.tokens.reasoning_events > 0 {
            writeln!(
                out,
                "{} Reasoning events: {}",
                timestamp, self.tokens.reasoning_events
            )?;
        }
        if let Some(usage) = &self.server_usage {
            writeln!(
                out,
                "{} Server usage: Prompt: {} Completion: {} Total: {}",
                timestamp, usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            )?;
        }

        if let Some(reason) = &self.finish_reason {
            writeln!(out, "{} Finish reason: {}", timestamp, reason)?;
        }

        if let Some(text) = &self.text {
            writeln!(out, "{} Response:", timestamp)?;
            writeln!(out, "{}", text)?;
        }

        Ok(())
    }
}

fn millis(duration: std::time::Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
