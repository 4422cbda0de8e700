use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILTER_ENV: &str = "LENS_LOG";
pub const LOG_FILE_NAME: &str = "lens.log";
const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("logging is already initialized: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Picks the filter directives from `raw`, falling back to `info` when they
/// are missing or invalid.
#[must_use]
pub fn filter_directives(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|raw| !raw.is_empty() && EnvFilter::try_new(raw).is_ok())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

/// Installs the global subscriber, appending plain-text events to
/// `lens.log` under `log_dir`. The terminal belongs to the UI, so nothing is
/// written to stderr.
pub fn init_logging(log_dir: &Path) -> Result<PathBuf, LoggingError> {
    let path = log_dir.join(LOG_FILE_NAME);
    let open_error = |source| LoggingError::Open {
        path: path.display().to_string(),
        source,
    };
    fs::create_dir_all(log_dir).map_err(open_error)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(open_error)?;

    let directives = filter_directives(std::env::var(LOG_FILTER_ENV).ok().as_deref());
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::new(&directives))
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_target(true)
                .with_ansi(false),
        );
    tracing::subscriber::set_global_default(subscriber)?;

    info!(filter = %directives, log_file = %path.display(), "logging initialized");
    Ok(path)
}
