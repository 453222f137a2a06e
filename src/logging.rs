//! Diagnostic file logging.
//!
//! The engine is hosted inside a terminal UI, so nothing may be written to
//! stdout or stderr. Logging is opt-in: when `AGENT_CONSOLE_LOG` names a
//! file, a `tracing-subscriber` fmt layer appends to it; otherwise no
//! subscriber is installed and every `tracing` macro is a no-op.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{fmt, EnvFilter};

use crate::{AppError, Result};

/// Environment variable naming the diagnostic log file.
pub const LOG_FILE_ENV: &str = "AGENT_CONSOLE_LOG";

/// Output format of the diagnostic log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Log file requested by the environment, if any.
#[must_use]
pub fn log_path_from_env() -> Option<PathBuf> {
    std::env::var_os(LOG_FILE_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Install file logging when `AGENT_CONSOLE_LOG` is set.
///
/// Returns the log path when a subscriber was installed.
///
/// # Errors
///
/// - `AppError::Io` if the log file cannot be opened.
/// - `AppError::Config` if a global subscriber is already installed.
pub fn init_from_env(format: LogFormat) -> Result<Option<PathBuf>> {
    let Some(path) = log_path_from_env() else {
        return Ok(None);
    };
    init_file(&path, format)?;
    Ok(Some(path))
}

/// Install a subscriber that appends to `path`.
///
/// # Errors
///
/// Same as [`init_from_env`].
pub fn init_file(path: &Path, format: LogFormat) -> Result<()> {
    let file = open_append(path)?;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file));

    match format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }
    Ok(())
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| AppError::Io(format!("cannot open log file {}: {err}", path.display())))
}
