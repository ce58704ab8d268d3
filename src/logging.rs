//! tracing subscriber setup.
//!
//! Logs go to stderr (stdout carries command replies). The long-running `run` command
//! also writes JSON lines to a daily-rolling file under `.switchyard/logs/`.

use anyhow::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "SWITCHYARD_LOG";

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub level: String,
    pub json: bool,
    /// Directory for the rolling log file, if any
    pub file_dir: Option<PathBuf>,
}

/// Keeps the file writer flushing until dropped.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Filter from an explicit directive, else `level`, else `info`.
pub fn filter_from(directive: Option<String>, level: &str) -> EnvFilter {
    directive
        .and_then(|d| EnvFilter::try_new(d).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

pub fn init(options: &LogOptions) -> Result<LogGuard> {
    let filter = filter_from(std::env::var(LOG_ENV).ok(), &options.level);

    let (plain, json) = if options.json {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            ),
            None,
        )
    };

    let (file_layer, file_guard) = match &options.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "switchyard.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().json().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {e}"))?;

    Ok(LogGuard { _file: file_guard })
}
