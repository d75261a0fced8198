//! Logging and tracing configuration
//!
//! The CLI logs compactly to stderr. The daemon runs in the background, so it
//! also writes a detailed log file through a non-blocking appender.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// File name of the daemon log inside [`paths::log_dir`]
const DAEMON_LOG_FILE: &str = "daemon.log";

/// Initialize tracing for the CLI (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("collab_debug=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();
}

/// Handle that keeps the daemon's log writer alive
pub struct DaemonLog {
    pub path: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

/// Open the non-blocking daemon log writer inside `log_dir`
fn open_log_writer(log_dir: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(log_dir).ok()?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(DAEMON_LOG_FILE)
        .build(log_dir)
        .ok()?;
    Some(tracing_appender::non_blocking(appender))
}

/// Initialize tracing for the daemon (file + stderr logging)
///
/// The returned handle must be held for the daemon's lifetime; dropping it
/// flushes and stops the background log writer. Without a usable log
/// directory the daemon logs to stderr only.
pub fn init_daemon() -> DaemonLog {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("collab_debug=debug,info"));

    let log_dir = paths::log_dir();
    let opened = log_dir.as_deref().and_then(open_log_writer);
    let path = opened
        .as_ref()
        .and(log_dir.as_ref())
        .map(|dir| dir.join(DAEMON_LOG_FILE));
    let (writer, guard) = match opened {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    let file_layer = writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .compact(),
        )
        .try_init();

    DaemonLog {
        path,
        _guard: guard,
    }
}
