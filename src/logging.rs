//! Logging Setup
//!
//! Initializes tracing with an env-filter, a stdout layer, and an optional
//! daily-rolling file layer for production debugging.

use std::path::Path;
use std::sync::OnceLock;

use tracing_subscriber::prelude::*;

/// Keeps the non-blocking file writer alive for the process lifetime.
static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Initializes the global tracing subscriber.
///
/// When `log_dir` is given, log lines are additionally written to a daily
/// rolling `mediaforge.log` in that directory. Initialization is best-effort:
/// if a subscriber is already installed (tests, embedding hosts), this is a
/// no-op.
pub fn init(log_dir: Option<&Path>) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(cfg!(debug_assertions));

    match log_dir {
        Some(dir) => {
            let _ = std::fs::create_dir_all(dir);
            let file_appender = tracing_appender::rolling::daily(dir, "mediaforge.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = LOG_GUARD.set(guard);

            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);

            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer);

            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        None => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer);

            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }
}
