//! Logger bootstrap with file and console output.

use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

use crate::error::Result;

/// Initialize the global logger.
///
/// Console mode writes human-readable output to stdout; file mode writes
/// daily-rotated files named `<service_name>.log` under `log_dir`. `RUST_LOG`
/// takes precedence over the configured level when set.
pub fn init_logger(
    log_dir: impl AsRef<Path>,
    service_name: &str,
    level: &str,
    console: bool,
) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    if console {
        fmt().with_env_filter(env_filter).init();

        tracing::info!(
            "Logger initialized for service: {} (console mode)",
            service_name
        );
    } else {
        std::fs::create_dir_all(&log_dir)?;

        let file_appender = RollingFileAppender::new(
            Rotation::DAILY,
            log_dir,
            format!("{service_name}.log"),
        );

        fmt()
            .with_env_filter(env_filter)
            .with_writer(file_appender)
            .with_ansi(false)
            .init();

        tracing::info!(
            "Logger initialized for service: {} (file mode)",
            service_name
        );
    }

    Ok(())
}
