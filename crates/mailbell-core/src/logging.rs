//! Logging infrastructure for mailbell.
//!
//! Structured logging on top of the `tracing` ecosystem:
//!
//! - JSON lines written to `~/.mailbell/logs/mailbell.log` (daily rotation)
//! - Compact human-readable output on stderr
//! - `-v` switches the default level to DEBUG; `RUST_LOG` overrides both
//!
//! ## Example
//!
//! ```no_run
//! use mailbell_core::logging;
//!
//! let _guard = logging::init_logging(None, false).expect("logging init");
//!
//! tracing::info!("mailbell started");
//! tracing::debug!(worker = "stream", "reconnecting");
//! ```

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::error::{MailbellError, Result};

/// Guard that must be held to ensure log flushing on shutdown.
///
/// Keep this guard alive for the lifetime of the application.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the mailbell logging system.
///
/// # Arguments
///
/// * `log_dir` - Optional custom log directory. Defaults to `~/.mailbell/logs/`
/// * `verbose` - If true, sets log level to DEBUG. Otherwise uses INFO.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => default_log_dir()?,
    };

    std::fs::create_dir_all(&log_dir).map_err(|e| MailbellError::DirectoryCreation {
        path: log_dir.clone(),
        source: e,
    })?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "mailbell.log");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "mailbell={default_level},mailbell_core={default_level},\
             mailbell_alert={default_level},mailbell_ingest={default_level}"
        ))
    });

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_span_list(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(verbose)
        .with_line_number(verbose)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::debug!(log_dir = %log_dir.display(), verbose, "logging initialized");

    Ok(LogGuard {
        _file_guard: Some(file_guard),
    })
}

/// Initialize minimal console-only logging for tests.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Get the mailbell home directory (`~/.mailbell/`).
pub fn mailbell_home() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| MailbellError::ConfigMissingField {
        field: "HOME environment variable".into(),
    })?;

    Ok(home.join(".mailbell"))
}

/// Get the default log directory path (`~/.mailbell/logs/`).
pub fn default_log_dir() -> Result<PathBuf> {
    Ok(mailbell_home()?.join("logs"))
}

/// Log a lifecycle event of an ingestion worker.
///
/// ```ignore
/// log_worker_event!("poll", "restarted");
/// log_worker_event!("stream", "reconnecting", attempt = 3);
/// ```
#[macro_export]
macro_rules! log_worker_event {
    ($worker:expr, $event:expr) => {
        tracing::info!(
            target: "mailbell::worker",
            worker = %$worker,
            event = $event,
            "worker event"
        )
    };
    ($worker:expr, $event:expr, $($field:tt)*) => {
        tracing::info!(
            target: "mailbell::worker",
            worker = %$worker,
            event = $event,
            $($field)*,
            "worker event"
        )
    };
}

/// Log an event of an alert delivery channel.
///
/// ```ignore
/// log_channel_event!("audio", "stopped", iterations = 2);
/// ```
#[macro_export]
macro_rules! log_channel_event {
    ($channel:expr, $event:expr) => {
        tracing::debug!(
            target: "mailbell::channel",
            channel = %$channel,
            event = $event,
            "channel event"
        )
    };
    ($channel:expr, $event:expr, $($field:tt)*) => {
        tracing::debug!(
            target: "mailbell::channel",
            channel = %$channel,
            event = $event,
            $($field)*,
            "channel event"
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_dir_under_home() {
        let dir = default_log_dir().unwrap();
        assert!(dir.ends_with(".mailbell/logs"));
    }

    #[test]
    fn test_init_test_logging() {
        init_test_logging();
        init_test_logging();
    }
}
