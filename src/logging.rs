//! Tracing setup for the binary.

use std::path::{Path, PathBuf};

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "syncvault=info";

/// Directory holding the rolling log files.
pub fn default_log_dir() -> Option<PathBuf> {
  dirs::data_dir().map(|dir| dir.join("syncvault").join("logs"))
}

/// Install the global subscriber.
///
/// Logs go to stderr when `verbose`, otherwise to a daily-rolling file in
/// `log_dir`. `RUST_LOG` wins over `filter`. Keep the returned guard alive
/// for the life of the process or buffered lines are lost.
pub fn init(filter: Option<&str>, verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let env_filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(filter.unwrap_or(DEFAULT_FILTER)))
    .map_err(|e| eyre!("Invalid log filter: {}", e))?;

  if verbose {
    tracing_subscriber::registry()
      .with(env_filter)
      .with(fmt::layer().with_writer(std::io::stderr))
      .try_init()
      .map_err(|e| eyre!("Failed to install logger: {}", e))?;
    return Ok(None);
  }

  let Some(dir) = log_dir.map(Path::to_path_buf).or_else(default_log_dir) else {
    return Ok(None);
  };
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, "syncvault.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::registry()
    .with(env_filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;

  Ok(Some(guard))
}
