//! Tracing subscriber setup for binaries and demos.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the application.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::Context;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "tile_optimizer";
const MAX_LOG_FILES: usize = 7;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install a console subscriber plus a daily-rolling file in `log_dir`.
///
/// `RUST_LOG` overrides `base_level`. The console shows compact progress
/// lines, with warnings and errors going to stderr; the file keeps targets
/// and structured fields of every event for later inspection.
pub fn setup_logging(base_level: &str, log_dir: impl AsRef<Path>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(base_level))
        .with_context(|| format!("Invalid log filter: {}", base_level))?;

    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(log_dir.as_ref())?);
    if LOG_GUARD.set(guard).is_err() {
        anyhow::bail!("Logging already initialized");
    }

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stdout.and(std::io::stderr.with_min_level(Level::WARN)));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Logger initialization failed")
}

fn file_appender(log_dir: &Path) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)
        .with_context(|| format!("Failed to create log file appender in {}", log_dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_directory_is_created_for_the_appender() {
        let dir = std::env::temp_dir()
            .join(format!("tile_optimizer_logs_{}", std::process::id()))
            .join("nested");

        file_appender(&dir).unwrap();

        assert!(dir.is_dir());
    }
}
