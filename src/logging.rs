use anyhow::Result;
use log::{LevelFilter, Log, Metadata, Record};
use ringlog::{Drain, File, LogBuilder, MultiLogBuilder, Output, Stderr};
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;

use crate::config::Config;

/// Maximum log file size before rotation (10MB)
const LOG_FILE_MAX_SIZE: u64 = 1024 * 1024 * 10;

/// Parse a filter like `hyper=info` into a module prefix and level.
pub fn parse_log_filter(filter: &str) -> Result<(String, LevelFilter)> {
    let Some((module, level)) = filter.split_once('=') else {
        anyhow::bail!("invalid log filter {:?}, expected module=level", filter);
    };
    let level = LevelFilter::from_str(level.trim())
        .map_err(|_| anyhow::anyhow!("invalid level in log filter {:?}", filter))?;
    Ok((module.trim().to_string(), level))
}

/// Handle to the installed logger. Buffered records are written out by
/// [`LogHandle::flush`].
pub struct LogHandle {
    drain: Option<Box<dyn Drain>>,
}

impl LogHandle {
    pub fn flush(&mut self) {
        if let Some(drain) = self.drain.as_mut() {
            let _ = drain.flush();
        } else {
            log::logger().flush();
        }
    }
}

/// Logger that applies per-module levels before writing to a ringlog output.
struct FilteredLogger {
    output: Mutex<Box<dyn Output>>,
    max_level: LevelFilter,
    filters: Vec<(String, LevelFilter)>,
}

impl FilteredLogger {
    fn level_for(&self, target: &str) -> LevelFilter {
        // Longest matching prefix wins
        self.filters
            .iter()
            .filter(|(prefix, _)| target.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, level)| *level)
            .unwrap_or(self.max_level)
    }
}

impl Log for FilteredLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata())
            && let Ok(mut output) = self.output.lock()
        {
            let _ = writeln!(
                output,
                "{} {:<5} [{}] {}",
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, false),
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        if let Ok(mut output) = self.output.lock() {
            let _ = output.flush();
        }
    }
}

/// Install the process logger according to `config`.
///
/// Logs go to stderr, or to a rotating file when `output.trace_log` is set.
pub fn init(config: &Config) -> Result<LogHandle> {
    let level = config.log.level.to_level_filter();

    let output: Box<dyn Output> = if let Some(ref log_file) = config.output.trace_log {
        let backup_file = log_file.with_extension("old");
        Box::new(File::new(log_file.clone(), backup_file, LOG_FILE_MAX_SIZE)?)
    } else {
        Box::new(Stderr::new())
    };

    let filters = config
        .log
        .filter
        .iter()
        .map(|f| parse_log_filter(f))
        .collect::<Result<Vec<_>>>()?;

    if filters.is_empty() {
        let base_log = LogBuilder::new()
            .output(output)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to initialize logger: {}", e))?;

        let drain = MultiLogBuilder::new()
            .level_filter(level)
            .default(base_log)
            .build()
            .start();

        return Ok(LogHandle { drain: Some(drain) });
    }

    // Filters can raise a module above the global level
    let max_level = filters
        .iter()
        .map(|(_, l)| *l)
        .chain(std::iter::once(level))
        .max()
        .unwrap_or(level);

    let logger = FilteredLogger {
        output: Mutex::new(output),
        max_level: level,
        filters,
    };

    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| anyhow::anyhow!("failed to set logger: {}", e))?;
    log::set_max_level(max_level);

    Ok(LogHandle { drain: None })
}
