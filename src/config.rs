use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::client::ClientConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>, // If not provided, will auto-detect from server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64, // Whole-request limit in seconds (0 = unbounded)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Hugging Face tokenizer.json used to count prompt tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<PathBuf>,
    /// Ask the server to report its own token usage at the end of the stream
    #[serde(default)]
    pub include_usage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_format")]
    pub format: OutputFormat,
    #[serde(default)]
    pub quiet: bool,
    /// Also print the generated text
    #[serde(default)]
    pub verbose: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    /// Per-module log level overrides (e.g., ["hyper=info", "reqwest=warn"])
    #[serde(default)]
    pub filter: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Console,
    Json,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: None,
            api_key: None,
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            max_tokens: None,
            temperature: None,
            tokenizer: None,
            include_usage: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_output_format(),
            quiet: false,
            verbose: false,
            trace_log: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            filter: Vec::new(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000/v1".to_string()
}

fn default_timeout() -> u64 {
    600
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_prompt() -> String {
    "Thank you.".to_string()
}

fn default_output_format() -> OutputFormat {
    OutputFormat::Console
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Build the effective configuration: the config file if one was given,
    /// then command-line flags on top.
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path).map_err(|e| {
                anyhow::anyhow!("failed to load config {}: {}", path.display(), e)
            })?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.url {
            self.endpoint.base_url = url.clone();
        }
        if let Some(key) = &cli.api_key {
            self.endpoint.api_key = Some(key.clone());
        }
        if let Some(model) = &cli.model {
            self.endpoint.model = Some(model.clone());
        }
        if let Some(prompt) = &cli.prompt {
            self.request.prompt = prompt.clone();
        }
        if let Some(max_tokens) = cli.max_tokens {
            self.request.max_tokens = Some(max_tokens);
        }
        if let Some(temperature) = cli.temperature {
            self.request.temperature = Some(temperature);
        }
        if let Some(tokenizer) = &cli.tokenizer {
            self.request.tokenizer = Some(tokenizer.clone());
        }
        if cli.include_usage {
            self.request.include_usage = true;
        }
        if let Some(format) = cli.format {
            self.output.format = format;
        }
        if cli.quiet {
            self.output.quiet = true;
        }
        if cli.verbose {
            self.output.verbose = true;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.endpoint.base_url.trim().is_empty() {
            anyhow::bail!("endpoint.base_url must not be empty");
        }

        if !self.endpoint.base_url.starts_with("http://")
            && !self.endpoint.base_url.starts_with("https://")
        {
            anyhow::bail!(
                "endpoint.base_url must start with http:// or https:// (got {})",
                self.endpoint.base_url
            );
        }

        if self.endpoint.connect_timeout == 0 {
            anyhow::bail!("connect_timeout must be greater than 0");
        }

        if self.request.prompt.is_empty() {
            anyhow::bail!("request.prompt must not be empty");
        }

        if let Some(temperature) = self.request.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            anyhow::bail!("temperature must be between 0 and 2");
        }

        if let Some(0) = self.request.max_tokens {
            anyhow::bail!("max_tokens must be greater than 0");
        }

        for filter in &self.log.filter {
            crate::logging::parse_log_filter(filter)?;
        }

        Ok(())
    }

    /// Client settings for the configured endpoint, once the model is known.
    pub fn client_config(&self, model: &str) -> ClientConfig {
        let mut client = ClientConfig::new(
            &self.endpoint.base_url,
            self.endpoint.api_key.as_deref(),
            model,
        );
        client.timeout =
            (self.endpoint.timeout > 0).then(|| Duration::from_secs(self.endpoint.timeout));
        client.connect_timeout = Duration::from_secs(self.endpoint.connect_timeout);
        client.max_tokens = self.request.max_tokens;
        client.temperature = self.request.temperature;
        client.include_usage = self.request.include_usage;
        client
    }
}
