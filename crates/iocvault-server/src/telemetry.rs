//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the filter comes from `LOG_LEVEL`.
//! `LOG_FORMAT=json` switches to one JSON object per event.

use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogFormat};

pub fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Only the first call in a process has any effect.
pub fn init_tracing(config: &LogConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(true);

    let installed = match config.format {
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    if let Err(e) = installed {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}
