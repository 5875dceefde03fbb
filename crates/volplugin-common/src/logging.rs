//! Logging bootstrap.
//!
//! Installs a `tracing` subscriber with an `EnvFilter`. `RUST_LOG` wins when
//! set; otherwise the level follows the global `debug` flag.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::GlobalConfig;

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Log at debug level when `RUST_LOG` is unset
    pub debug: bool,
    /// Emit ANSI colors
    pub ansi: bool,
}

impl From<&GlobalConfig> for LoggingConfig {
    fn from(global: &GlobalConfig) -> Self {
        Self {
            debug: global.debug,
            ansi: false,
        }
    }
}

impl LoggingConfig {
    fn default_directive(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed, which makes this
/// safe to call from several tests.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let fmt_layer = fmt::layer().with_target(true).with_ansi(config.ansi);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
