//! Tracing subscriber setup
//!
//! Two layers:
//! - Console: controlled by `RUST_LOG`, else the configured level (default: info)
//! - File: debug-level JSON, daily rolling, only when `logging.dir` is set

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LoggingConfig, FALLBACK_LOG_LEVEL};

/// Log file prefix inside the configured directory
pub const LOG_FILE_NAME: &str = "projectflow.log";

/// Install the global subscriber.
///
/// Returns the appender guard when a file layer was installed; keep it alive
/// for the lifetime of the process. Calling this twice is harmless: the second
/// installation attempt is ignored.
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let level = config.level.unwrap_or(FALLBACK_LOG_LEVEL);
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if let Some(log_dir) = &config.dir {
        if std::fs::create_dir_all(log_dir).is_ok() {
            let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let _ = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_filter(console_filter),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking)
                        .with_target(true)
                        .with_filter(EnvFilter::new("debug")),
                )
                .try_init();

            return Some(guard);
        }
    }

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(console_filter),
        )
        .try_init();

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_tracing_with_file_layer() {
        let temp = TempDir::new().unwrap();
        let config = LoggingConfig {
            level: None,
            dir: Some(temp.path().join("logs")),
        };

        let guard = init_tracing(&config);
        assert!(guard.is_some());
        assert!(temp.path().join("logs").is_dir());

        // Second call must not panic
        let _ = init_tracing(&LoggingConfig::default());
    }
}
