//! Logging configuration and initialization.
//!
//! Provides daily rotating file logging or console logging, selected by
//! environment variable.

use anyhow::Result;
use std::env;
use tracing::{info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with configurable output destination.
///
/// ## Environment Variables
///
/// - `LOG_DESTINATION`: Output destination - "console" or "file" (default: "console")
/// - `LOG_DIR`: Directory for log files (default: "./logs") - only used when LOG_DESTINATION=file
/// - `LOG_FILE_PREFIX`: Prefix for log file names (default: "tracker") - only used when LOG_DESTINATION=file
/// - `RUST_LOG`: Log filter (default: "info")
pub fn init_logging() -> Result<()> {
    let log_destination = env::var("LOG_DESTINATION").unwrap_or_else(|_| "console".to_string());

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        warn!("Failed to parse RUST_LOG environment variable, defaulting to 'info' level");
        "info".into()
    });

    match log_destination.to_lowercase().as_str() {
        "file" => {
            let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
            let log_file_prefix =
                env::var("LOG_FILE_PREFIX").unwrap_or_else(|_| "tracker".to_string());

            std::fs::create_dir_all(&log_dir).map_err(|e| {
                anyhow::anyhow!("Failed to create log directory '{}': {}", log_dir, e)
            })?;

            let file_appender = rolling::daily(&log_dir, &log_file_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false),
                )
                .init();

            info!("Logging to daily rotating files in: {}/", log_dir);
            info!(
                "Log file pattern: {}/{}.<YYYY-MM-DD>",
                log_dir, log_file_prefix
            );

            // The guard keeps the background logging thread alive; it must
            // live for the whole process.
            std::mem::forget(guard);
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stdout)
                        .with_ansi(true)
                        .with_target(false),
                )
                .init();

            info!("Logging to console (stdout)");
        }
    }

    Ok(())
}
