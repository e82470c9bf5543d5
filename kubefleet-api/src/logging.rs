//! Logging setup
//!
//! Console output always, plus a daily-rolling JSON file when a log
//! directory is configured. `RUST_LOG` takes precedence over the configured
//! level.

use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "kubefleet.log";

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    let console_layer = if config.json {
        fmt::layer()
            .with_target(true)
            .json()
            .with_writer(io::stdout)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
            .with_writer(io::stdout)
            .boxed()
    };

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let (writer, guard) = non_blocking(rolling::daily(dir, LOG_FILE_PREFIX));
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!("Logging initialized - level: {}", config.level);

    Ok(guard)
}

/// Log an operation on one member cluster
#[macro_export]
macro_rules! log_cluster_operation {
    ($op:expr, $cluster_id:expr) => {
        tracing::info!(
            operation = $op,
            cluster_id = %$cluster_id,
            "Cluster operation"
        )
    };
    ($op:expr, $cluster_id:expr, $($fields:tt)+) => {
        tracing::info!(
            operation = $op,
            cluster_id = %$cluster_id,
            $($fields)+,
            "Cluster operation"
        )
    };
}
