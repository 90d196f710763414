use clap::Parser;
use std::path::PathBuf;

use crate::config::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ttft-bench")]
#[command(author, version, about = "Measure time-to-first-token and throughput of a streaming chat endpoint", long_about = None)]
pub struct Cli {
    /// Optional TOML configuration file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Base URL of the OpenAI-compatible API (e.g. http://localhost:8000/v1)
    #[arg(long)]
    pub url: Option<String>,

    /// API key sent as a bearer token
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model name; detected from the server when omitted
    #[arg(short, long)]
    pub model: Option<String>,

    /// Prompt to send
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Hugging Face tokenizer.json used to count prompt tokens
    #[arg(long)]
    pub tokenizer: Option<PathBuf>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub temperature: Option<f32>,

    /// Ask the server to report token usage at the end of the stream
    #[arg(long)]
    pub include_usage: bool,

    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Print the generated text along with the measurements
    #[arg(short, long)]
    pub verbose: bool,

    /// Only print the result, no banner
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
