//! Tracing subscriber setup.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::config::LoggingConfig;

/// Holds the file appender guard so buffered logs flush on drop.
pub struct Logging {
    _guard: Option<WorkerGuard>,
}

/// Initialize tracing from config. `RUST_LOG` overrides the configured
/// default level.
pub fn init(config: &LoggingConfig) -> Result<Logging> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.level.parse()?)
        .from_env_lossy();

    let guard = if let Some(ref log_dir) = config.log_dir {
        let file_appender = rolling::daily(log_dir, "dramatis.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true);

        let stdout_layer: Box<dyn Layer<_> + Send + Sync> = if config.format == "json" {
            Box::new(tracing_subscriber::fmt::layer().json().with_target(true))
        } else {
            Box::new(tracing_subscriber::fmt::layer().with_target(true))
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stdout_layer)
            .init();
        Some(guard)
    } else {
        let stdout_layer: Box<dyn Layer<_> + Send + Sync> = if config.format == "json" {
            Box::new(tracing_subscriber::fmt::layer().json().with_target(true))
        } else {
            Box::new(tracing_subscriber::fmt::layer().with_target(true))
        };
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .init();
        None
    };

    Ok(Logging { _guard: guard })
}
