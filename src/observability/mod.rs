//! # Observability
//!
//! Structured logging setup for the control plane using the tracing
//! ecosystem. Log level and format come from [`crate::config::LogConfig`];
//! `RUST_LOG` overrides the configured level when set.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogConfig, LogFormat};

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; subsequent calls return an error from the
/// underlying registry which callers may ignore in tests.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    match config.format {
        LogFormat::Json => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(true))
                .try_init();
        }
        LogFormat::Text => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .try_init();
        }
    }
}
