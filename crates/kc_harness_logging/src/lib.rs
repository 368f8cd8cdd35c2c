//! Shared logging utilities for the Keycloak harness binary and its tests.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "kc_harness=info";
const VERBOSE_LOG_FILTER: &str = "kc_harness=debug";

/// Logging configuration for harness binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a daily-rolled file writer and stderr output.
///
/// The file layer always records at the `RUST_LOG` level (or the default
/// filter); `verbose` only widens what reaches stderr.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let file_appender =
        tracing_appender::rolling::daily(&log_dir, format!("{}.log", sanitize_name(config.app_name)));

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console_filter = if config.verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Install a subscriber that writes through the libtest capture.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(VERBOSE_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Get the harness home directory: ~/.kc_harness
pub fn harness_home() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("KC_HARNESS_HOME") {
        return Ok(PathBuf::from(override_path));
    }
    dirs::home_dir()
        .map(|home| home.join(".kc_harness"))
        .context("Could not determine home directory")
}

/// Get the logs directory: ~/.kc_harness/logs
pub fn logs_dir() -> Result<PathBuf> {
    Ok(harness_home()?.join("logs"))
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir()?;
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("kc-harness"), "kc-harness");
        assert_eq!(sanitize_name("kc harness/x"), "kc_harness_x");
    }

    #[test]
    fn test_init_test_logging_is_idempotent() {
        init_test_logging();
        init_test_logging();
        tracing::debug!("logging initialised twice without panicking");
    }

    #[test]
    fn test_ensure_logs_dir_respects_home_override() {
        let temp = tempfile::tempdir().unwrap();
        std::env::set_var("KC_HARNESS_HOME", temp.path());

        let logs = ensure_logs_dir().unwrap();

        assert_eq!(logs, temp.path().join("logs"));
        assert!(logs.is_dir());
        std::env::remove_var("KC_HARNESS_HOME");
    }
}
