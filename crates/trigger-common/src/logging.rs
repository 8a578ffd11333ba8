// Tracing subscriber initialization for the daemon process.
// Log destination and verbosity come from the configuration surface, not
// from ambient context values; components log through the global `tracing`
// dispatcher with structured fields.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Settings controlling where and how verbosely the process logs.
#[derive(Debug, Clone, Default)]
pub struct LogSettings {
    /// Emit debug-level output.
    pub verbose: bool,
    /// Write log lines to this file instead of stderr.
    /// `-` is treated the same as unset.
    pub log_file: Option<PathBuf>,
}

/// Keeps the non-blocking file writer alive for the lifetime of the process.
/// Dropping it flushes and closes the log file.
pub struct LogWriterGuard {
    _guard: Option<WorkerGuard>,
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the default level when set. Returns a guard that
/// must be held until the process exits.
pub fn init(settings: &LogSettings) -> Result<LogWriterGuard> {
    let default_level = if settings.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_target = settings
        .log_file
        .as_ref()
        .filter(|path| path.as_os_str() != "-");

    let guard = match file_target {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .context("Log file path has no file name")?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            LogWriterGuard {
                _guard: Some(guard),
            }
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            LogWriterGuard { _guard: None }
        }
    };

    tracing::debug!(
        verbose = settings.verbose,
        log_file = ?file_target,
        "Logging initialized"
    );
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test only: a process can install the global subscriber once.
    #[test]
    fn init_installs_a_stderr_subscriber_by_default() {
        let guard = init(&LogSettings::default()).expect("init should succeed");
        tracing::debug!("subscriber accepts events");
        drop(guard);
    }
}
