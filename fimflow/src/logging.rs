//! Logging infrastructure.
//!
//! The service writes line-delimited JSON to `logs/fimflow.log` through a
//! non-blocking appender and a compact human format to stdout. Stage child
//! processes instead log JSON straight to stdout so every captured line is
//! one JSON object; the supervisor stores them verbatim and treats the
//! final stdout line as the result document.
//!
//! Filtering comes from `RUST_LOG`, defaulting to `info`.

use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keep this guard alive for the lifetime of the service; dropping it
/// flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

pub const LOG_FILE_NAME: &str = "fimflow.log";

/// Initializes service logging: JSON file plus console.
pub fn init_logging(log_dir: &Path) -> Result<LoggingGuard, io::Error> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE_NAME);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .json();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(false)
        .compact();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Initializes stage child-process logging: JSON to stdout only.
pub fn init_child_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(false)
        .json();
    // A second initialization in-process is a no-op, not a crash.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_logging_is_idempotent() {
        init_child_logging();
        init_child_logging();
    }
}
