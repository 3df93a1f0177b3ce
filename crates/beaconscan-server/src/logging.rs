//! Logging initialization and configuration.
//!
//! This module provides environment-aware logging setup:
//! - **Production**: JSON logs to rolling files + compact logs to stdout
//! - **Development**: Pretty logs to stdout with span events
//!
//! The mode is chosen by `BEACONSCAN_ENV`; the filter comes from `RUST_LOG`,
//! then `BEACONSCAN_LOG_LEVEL`, then `info`.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting the logging mode.
pub const ENV_VAR: &str = "BEACONSCAN_ENV";

/// Environment variable holding the fallback filter directive.
pub const LOG_LEVEL_VAR: &str = "BEACONSCAN_LOG_LEVEL";

/// Static guards to keep non-blocking writers alive.
/// These must persist for the lifetime of the program.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Whether `BEACONSCAN_ENV` asks for production logging.
#[must_use]
pub fn is_production() -> bool {
    std::env::var(ENV_VAR).is_ok_and(|value| is_production_value(&value))
}

fn is_production_value(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "production" | "prod")
}

/// Initialize the logging system with environment-appropriate configuration.
///
/// # Production Mode
///
/// - Logs to rolling daily files in `/var/log/beaconscan/`
/// - Also logs to stdout for systemd journal capture
/// - JSON format for structured logging in files
/// - Compact format for stdout (no ANSI colors)
///
/// # Development Mode
///
/// - Logs to stdout only with pretty formatting
/// - Includes span events for debugging
///
/// # Errors
///
/// Returns an error if the env filter cannot be parsed or the log directory
/// cannot be created.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let log_level = std::env::var(LOG_LEVEL_VAR).unwrap_or_else(|_| "info".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    if is_production {
        init_production(env_filter)?;
    } else {
        init_development(env_filter);
    }

    Ok(())
}

/// Initialize production logging with file + stdout output.
fn init_production(env_filter: EnvFilter) -> anyhow::Result<()> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "beaconscan");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // No ANSI colors for journald
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    Ok(())
}

/// Initialize development logging with pretty stdout output.
fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

/// Returns the log directory for the current platform.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/beaconscan")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beaconscan")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_is_valid_path() {
        let dir = log_directory();
        assert!(dir.ends_with("beaconscan") || dir.ends_with("logs"));
    }

    #[test]
    fn test_production_values() {
        assert!(is_production_value("production"));
        assert!(is_production_value(" PROD "));
        assert!(!is_production_value("development"));
        assert!(!is_production_value(""));
    }
}
