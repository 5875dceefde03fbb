//! Global configuration stored at `<prefix>/global-config`.

use tracing::debug;

use volplugin_common::{GlobalConfig, Result};

use crate::client::{Client, GetOptions, SetOptions};
use crate::entity::{Entity, publish_entity};
use crate::pather::PathBuilder;

const GLOBAL_KEY: &str = "global-config";

impl Entity for GlobalConfig {
    fn path(&self, root: &PathBuilder) -> Result<PathBuilder> {
        root.append(&[GLOBAL_KEY])
    }

    fn payload(&self) -> Result<Vec<u8>> {
        self.to_json()
    }
}

/// Validate and write the global configuration.
pub async fn publish_global<C: Client + ?Sized>(client: &C, global: &GlobalConfig) -> Result<()> {
    global.validate()?;
    publish_entity(client, global, &SetOptions::default()).await?;
    debug!(ttl = ?global.ttl, timeout = ?global.timeout, "Published global configuration");
    Ok(())
}

/// Read the global configuration. Fails with `NotExists` if none was
/// published.
pub async fn get_global<C: Client + ?Sized>(client: &C) -> Result<GlobalConfig> {
    let path = client.path().append(&[GLOBAL_KEY])?;
    let node = client.get(&path, &GetOptions::default()).await?;
    GlobalConfig::from_json(&node.value)
}
