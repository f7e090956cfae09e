use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Rotated log files kept on disk.
const MAX_LOG_FILES: usize = 3;

/// Keeps the file writer flushing; hold it until the process exits.
#[allow(dead_code)]
pub struct LoggerGuard(WorkerGuard);

/// Install the global subscriber: a stderr layer and a daily rolling file.
///
/// `level` is the default directive; RUST_LOG, when set, refines it.
/// Stdout is left alone, it carries command output.
pub fn init_logging(log_dir: impl AsRef<Path>, prefix: &str, level: &str) -> Result<LoggerGuard> {
  let (default_level, level_valid) = match level {
    "trace" => (LevelFilter::TRACE, true),
    "debug" => (LevelFilter::DEBUG, true),
    "info" => (LevelFilter::INFO, true),
    "warn" => (LevelFilter::WARN, true),
    "error" => (LevelFilter::ERROR, true),
    _ => (LevelFilter::INFO, false),
  };

  let builder = EnvFilter::builder().with_default_directive(default_level.into());
  let rust_log = std::env::var("RUST_LOG").unwrap_or_default();
  let console_filter = builder.clone().parse_lossy(&rust_log);
  let file_filter = builder.parse_lossy(&rust_log);

  let file_appender = RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix(prefix)
    .filename_suffix("log")
    .max_log_files(MAX_LOG_FILES)
    .build(log_dir.as_ref())
    .map_err(|e| eyre!("Failed to create log file appender: {}", e))?;
  let (non_blocking, guard) = NonBlocking::new(file_appender);

  let file_layer = fmt::layer()
    .with_writer(non_blocking)
    .with_ansi(false)
    .with_filter(file_filter);
  let console_layer = fmt::layer()
    .with_writer(std::io::stderr)
    .with_filter(console_filter);

  tracing_subscriber::registry()
    .with(file_layer)
    .with(console_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  if !level_valid {
    tracing::warn!("Invalid log level '{}', defaulting to 'info'", level);
  }

  Ok(LoggerGuard(guard))
}
