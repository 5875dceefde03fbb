//! Publishing and removing use-locks in the key-value store.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use volplugin_common::{Result, VolpluginError};
use volplugin_kv::{Client, DeleteOptions, Entity, GetOptions, SetOptions};

use crate::uses::{UseLocker, UseType, use_dir, use_path};

/// Use-lock operations on top of a [`Client`].
#[derive(Clone)]
pub struct UseStore {
    client: Arc<dyn Client>,
}

impl UseStore {
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn Client> {
        &self.client
    }

    /// Create the use. If it already exists and the lock type allows it, take
    /// it over as long as the stored payload is ours.
    pub async fn publish_use(&self, lock: &dyn UseLocker) -> Result<()> {
        let path = lock.path(self.client.path())?;
        let payload = lock.payload()?;

        let result = match self
            .client
            .set(&path, &payload, &SetOptions::no_exist())
            .await
        {
            Err(e) if e.is_exists() && lock.may_exist() => {
                self.client
                    .set(
                        &path,
                        &payload,
                        &SetOptions::exist_with_value(payload.clone()),
                    )
                    .await
            }
            other => other,
        };

        debug!(path = %path, ok = result.is_ok(), "Publishing use {:?}", lock);
        result
    }

    /// Publish the use with a TTL. Refreshes our own entry when present and
    /// creates it when absent.
    pub async fn publish_use_with_ttl(&self, lock: &dyn UseLocker, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(VolpluginError::Internal(format!(
                "ttl must be positive for use {:?}",
                lock
            )));
        }

        let path = lock.path(self.client.path())?;
        let payload = lock.payload()?;
        debug!(path = %path, ttl = ?ttl, "Publishing use with TTL {:?}", lock);

        let publish_failed = |e: VolpluginError| {
            VolpluginError::LockFailed(format!("publish mount {}: {}", lock.volume(), e))
        };

        match self
            .client
            .set(
                &path,
                &payload,
                &SetOptions::compare_value(payload.clone()).with_ttl(ttl),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_exists() => self
                .client
                .set(&path, &payload, &SetOptions::no_exist().with_ttl(ttl))
                .await
                .map_err(publish_failed),
            Err(e) => Err(publish_failed(e)),
        }
    }

    /// Remove the use. Without `force` only our own payload is removed.
    pub async fn remove_use(&self, lock: &dyn UseLocker, force: bool) -> Result<()> {
        let path = lock.path(self.client.path())?;
        let opts = if force {
            DeleteOptions::default()
        } else {
            DeleteOptions::compare_value(lock.payload()?)
        };

        debug!(path = %path, force, "Removing use {:?}", lock);
        self.client.delete(&path, &opts).await
    }

    /// Decode the current holder of a use.
    pub async fn get_use<T: DeserializeOwned>(&self, lock_type: UseType, volume: &str) -> Result<T> {
        let path = use_path(self.client.path(), lock_type, volume)?;
        let node = self.client.get(&path, &GetOptions::default()).await?;
        Ok(serde_json::from_slice(&node.value)?)
    }

    /// `<policy>/<volume>` names with a use of `lock_type`.
    pub async fn list_uses(&self, lock_type: UseType) -> Result<Vec<String>> {
        let dir = use_dir(self.client.path(), lock_type)?;

        let root = match self.client.get(&dir, &GetOptions::recursive()).await {
            Ok(node) => node,
            Err(e) if e.is_not_exists() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(root
            .leaves()
            .into_iter()
            .filter(|node| node.key != root.key)
            .map(|node| dir.trim(&node.key).to_string())
            .collect())
    }
}
