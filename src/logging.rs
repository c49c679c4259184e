//! Tracing subscriber set-up.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use crate::config::LoggingSection;

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(config: &LoggingSection, verbose: bool) -> String {
    if verbose {
        "shopflow=debug,info".to_string()
    } else {
        config.level.clone()
    }
}

/// Install the global subscriber.
///
/// Logs go to stderr (human or JSON) and, when `directory` is configured,
/// to a daily-rolling JSON file as well. The returned guard flushes the
/// file writer on drop and must be held for the life of the process.
pub fn init_tracing(config: &LoggingSection, verbose: bool) -> Result<Option<WorkerGuard>> {
    let directive = default_directive(config, verbose);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&directive)
            .with_context(|| format!("Invalid log filter '{}'", directive))?,
    };

    let stderr_layer = if config.json {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "shopflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
