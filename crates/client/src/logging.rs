//! Diagnostic logging setup.
//!
//! Logs go through a non-blocking writer to stderr, or to the configured
//! file so they never interleave with session output on the terminal. The
//! returned guard must be held until exit to flush buffered lines.

use std::fs::OpenOptions;
use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Environment variable holding a full filter directive, e.g. `client=trace`.
pub const ENV_LOG_FILTER: &str = "VMSH_LOG_FILTER";

/// Dependencies that are noisy below `info`.
const QUIET_TARGETS: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "rustls",
    "tungstenite",
    "tokio_tungstenite",
];

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("failed to install logger: {0}")]
    Install(String),
}

/// Installs the global subscriber.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<WorkerGuard, LoggingError> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = match std::env::var(ENV_LOG_FILTER) {
        Ok(directives) if !directives.is_empty() => directives,
        _ => default_directives(level),
    };
    let filter = EnvFilter::try_new(&filter).map_err(|e| LoggingError::Filter(e.to_string()))?;

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoggingError::Install(e.to_string()))?;

    Ok(guard)
}

/// Filter directives for `level`, keeping dependencies at `info` or above.
fn default_directives(level: &str) -> String {
    let level = level.to_lowercase();
    if matches!(level.as_str(), "debug" | "trace") {
        let mut directives = vec![level.clone()];
        directives.extend(QUIET_TARGETS.iter().map(|target| format!("{}=info", target)));
        directives.join(",")
    } else {
        level
    }
}
