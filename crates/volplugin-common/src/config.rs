//! Global configuration for volplugin
//!
//! The global configuration carries the timing parameters every host shares:
//! the lock TTL, the command timeout, and the base mount path. It can be
//! loaded from a file and `VOLPLUGIN_*` environment variables, or exchanged
//! through the key-value store as JSON.

use std::time::Duration;

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VolpluginError};

/// TTL used when none is configured.
pub const DEFAULT_GLOBAL_TTL: Duration = Duration::from_secs(30);

/// Command timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Base mount path used when none is configured.
pub const DEFAULT_MOUNT_PATH: &str = "/mnt/ceph";

/// Environment prefix for configuration overrides.
pub const ENV_PREFIX: &str = "VOLPLUGIN";

/// Global configuration shared by every host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalConfig {
    pub debug: bool,
    pub timeout: Duration,
    pub ttl: Duration,
    pub mount_path: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            debug: false,
            timeout: DEFAULT_TIMEOUT,
            ttl: DEFAULT_GLOBAL_TTL,
            mount_path: DEFAULT_MOUNT_PATH.to_string(),
        }
    }
}

/// Serialized form. `ttl` is in seconds and `timeout` in minutes; zero or
/// missing values fall back to the defaults.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct GlobalWire {
    debug: bool,
    timeout: u64,
    ttl: u64,
    mount_path: String,
}

impl From<GlobalWire> for GlobalConfig {
    fn from(wire: GlobalWire) -> Self {
        let mut global = GlobalConfig {
            debug: wire.debug,
            timeout: Duration::from_secs(wire.timeout.saturating_mul(60)),
            ttl: Duration::from_secs(wire.ttl),
            mount_path: wire.mount_path,
        };
        global.fixup();
        global
    }
}

impl From<&GlobalConfig> for GlobalWire {
    fn from(global: &GlobalConfig) -> Self {
        Self {
            debug: global.debug,
            timeout: global.timeout.as_secs() / 60,
            ttl: global.ttl.as_secs(),
            mount_path: global.mount_path.clone(),
        }
    }
}

impl GlobalConfig {
    /// Load the configuration from an optional file and the environment.
    ///
    /// Environment variables take precedence over the file, e.g.
    /// `VOLPLUGIN_TTL=60` or `VOLPLUGIN_MOUNT_PATH=/mnt/rbd`.
    pub fn load(file: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let wire: GlobalWire = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        let global = GlobalConfig::from(wire);
        global.validate()?;
        Ok(global)
    }

    /// Decode a configuration from its JSON form, applying defaults.
    pub fn from_json(content: &[u8]) -> Result<Self> {
        let wire: GlobalWire = serde_json::from_slice(content)?;
        Ok(GlobalConfig::from(wire))
    }

    /// Encode the configuration to its JSON form.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&GlobalWire::from(self))?)
    }

    fn fixup(&mut self) {
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }

        if self.ttl.is_zero() {
            self.ttl = DEFAULT_GLOBAL_TTL;
        }

        if self.mount_path.is_empty() {
            self.mount_path = DEFAULT_MOUNT_PATH.to_string();
        }
    }

    /// Reject values the lock refresh loops cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.ttl < Duration::from_millis(4) {
            return Err(VolpluginError::Config(format!(
                "ttl {:?} is too small to refresh",
                self.ttl
            )));
        }

        if self.mount_path.is_empty() {
            return Err(VolpluginError::Config("mount path is empty".to_string()));
        }

        Ok(())
    }
}
