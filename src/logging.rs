//! Logging setup
//!
//! The library only emits `tracing` events. Binaries and embedding servers
//! call [`init`] once with their configuration to install a subscriber.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a formatting subscriber filtered by `RUST_LOG` or the configured filter
///
/// Returns false if a global subscriber was already installed.
pub fn init(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
