use anyhow::{Context, Result};
use log::{debug, info};
use std::process::ExitCode;
use std::time::Duration;

use ttft_bench::client::{self, ClientError};
use ttft_bench::config::OutputFormat;
use ttft_bench::logging::{self, LogHandle};
use ttft_bench::{BenchmarkReport, BenchmarkRunner, Cli, Config, SystemClock, Tokenizer};

/// Exit status when the benchmark request itself failed
const EXIT_BENCHMARK_FAILED: u8 = 1;
/// Exit status for configuration, tokenizer or setup problems
const EXIT_USAGE: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let mut log_handle = match logging::init(&config) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let outcome = runtime.block_on(run_benchmark(&config, &mut log_handle));
    log_handle.flush();

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

/// Failures of the benchmark request map to 1, everything that stopped it
/// from being sent (including building the HTTP client) to 2.
fn exit_status(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<ClientError>() {
        Some(e) if e.is_run_failure() => EXIT_BENCHMARK_FAILED,
        _ => EXIT_USAGE,
    }
}

async fn run_benchmark(config: &Config, log_handle: &mut LogHandle) -> Result<()> {
    let endpoint = &config.endpoint;

    let model = match &endpoint.model {
        Some(model) => model.clone(),
        None => {
            info!("Model not specified, querying server for available models");
            client::detect_model(
                &endpoint.base_url,
                endpoint.api_key.as_deref(),
                Duration::from_secs(endpoint.connect_timeout),
            )
            .await?
        }
    };

    let tokenizer = Tokenizer::load(config.request.tokenizer.as_deref(), &model)?;
    let input_tokens = tokenizer
        .count_tokens(&config.request.prompt)
        .context("failed to count prompt tokens")?;
    debug!("Prompt is {} tokens ({:?})", input_tokens, tokenizer.model_type());

    let json_to_stdout = config.output.format == OutputFormat::Json;
    if !config.output.quiet && !json_to_stdout {
        println!("TTFT Benchmark");
        println!("   Target: {}", endpoint.base_url);
        println!("   Model: {}", model);
        println!("   Input tokens: {}", input_tokens);
        println!();
    }
    log_handle.flush();

    let runner = BenchmarkRunner::new(config.client_config(&model))?;
    let result = runner
        .run(&config.request.prompt, input_tokens, &SystemClock)
        .await?;

    let report = BenchmarkReport::new(&endpoint.base_url, &model, &result, config.output.verbose);
    match config.output.format {
        OutputFormat::Console => report.write_console(&mut std::io::stdout().lock())?,
        OutputFormat::Json => println!("{}", report.to_json()?),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_failures_exit_with_benchmark_failed() {
        let refused = anyhow::Error::new(ClientError::Connection("refused".into()));
        assert_eq!(exit_status(&refused), EXIT_BENCHMARK_FAILED);

        let status = anyhow::Error::new(ClientError::Http5xx {
            status: 503,
            message: String::new(),
        });
        assert_eq!(exit_status(&status), EXIT_BENCHMARK_FAILED);

        let reset = anyhow::Error::new(ClientError::Transport("reset".into()));
        assert_eq!(exit_status(&reset), EXIT_BENCHMARK_FAILED);
    }

    #[test]
    fn test_setup_failures_exit_with_usage() {
        let builder = anyhow::Error::new(ClientError::Other(
            "failed to build HTTP client: no TLS backend".into(),
        ));
        assert_eq!(exit_status(&builder), EXIT_USAGE);

        let tokenizer = anyhow::anyhow!("failed to load tokenizer");
        assert_eq!(exit_status(&tokenizer), EXIT_USAGE);
    }
}
