//! Volplugin Common - Shared types and utilities
//!
//! This crate provides the foundations used by every volplugin layer:
//! - Error taxonomy for the key-value, lock, and mount layers
//! - Global configuration (TTL, timeout, mount path)
//! - Logging bootstrap
//! - Stop handles for cooperative background loops

pub mod config;
pub mod error;
pub mod logging;
pub mod stop;

// Re-exports for convenience
pub use config::GlobalConfig;
pub use error::{Result, VolpluginError};
pub use logging::{LoggingConfig, init_logging};
pub use stop::{StopHandle, StopSignal, stop_channel};

/// Default key-value namespace for volplugin data
pub const DEFAULT_PREFIX: &str = "volplugin";
