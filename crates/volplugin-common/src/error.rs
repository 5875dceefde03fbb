//! Error types for volplugin
//!
//! This module defines:
//! - `VolpluginError`: the recoverable error taxonomy shared by the key-value,
//!   lock, and mount layers
//! - `Result<T>`: a convenience alias over `VolpluginError`
//!
//! Invariant violations in host-local bookkeeping (negative mount counts,
//! duplicate mount registration) are not represented here. Those abort.

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum VolpluginError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid volume name: {0}")]
    InvalidVolume(String),

    #[error("does not exist: {0}")]
    NotExists(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("locking operation failed: {0}")]
    LockFailed(String),

    #[error("compare/swap lock operation failed: {0}")]
    LockMismatch(String),

    #[error("could not publish use lock: {0}")]
    LockPublish(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VolpluginError {
    /// Whether this error reports a missing key or record.
    pub fn is_not_exists(&self) -> bool {
        matches!(self, VolpluginError::NotExists(_))
    }

    /// Whether this error reports a key that is already present.
    pub fn is_exists(&self) -> bool {
        matches!(self, VolpluginError::Exists(_))
    }

    /// Whether this error came out of the locking protocol.
    pub fn is_lock_error(&self) -> bool {
        matches!(
            self,
            VolpluginError::LockFailed(_)
                | VolpluginError::LockMismatch(_)
                | VolpluginError::LockPublish(_)
        )
    }
}

impl From<config::ConfigError> for VolpluginError {
    fn from(value: config::ConfigError) -> Self {
        VolpluginError::Config(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VolpluginError>;
