//! Host-side mount and unmount sequencing.
//!
//! A mount on a locked volume holds a permanent `Mount` use while the
//! bookkeeping runs, then converts it into a TTL-refreshed use for as long as
//! the device stays mounted. Unlocked volumes skip the store entirely and only
//! use the local counter and collection.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use volplugin_common::{GlobalConfig, Result, VolpluginError};
use volplugin_kv::Client;
use volplugin_lock::uses::split_volume;
use volplugin_lock::{LockDriver, Reason, StopRegistry, Timeout, UseMount};

use crate::collection::MountCollection;
use crate::counter::MountCounter;
use crate::driver::MountDriver;

/// Ties the use-lock, mount counter, mount collection, and storage driver
/// together for one host.
pub struct Mounter {
    hostname: String,
    global: GlobalConfig,
    lock: LockDriver,
    driver: Arc<dyn MountDriver>,
    counter: MountCounter,
    collection: MountCollection,
    refreshes: StopRegistry,
}

impl Mounter {
    pub fn new(
        hostname: impl Into<String>,
        global: GlobalConfig,
        client: Arc<dyn Client>,
        driver: Arc<dyn MountDriver>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            global,
            lock: LockDriver::new(client),
            driver,
            counter: MountCounter::new(),
            collection: MountCollection::new(),
            refreshes: StopRegistry::new(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn counter(&self) -> &MountCounter {
        &self.counter
    }

    pub fn collection(&self) -> &MountCollection {
        &self.collection
    }

    pub fn refreshes(&self) -> &StopRegistry {
        &self.refreshes
    }

    pub fn lock_driver(&self) -> &LockDriver {
        &self.lock
    }

    fn use_mount(&self, volume: &str) -> UseMount {
        UseMount::new(volume, self.hostname.as_str(), Reason::Mount)
    }

    fn timeout(&self) -> Timeout {
        Timeout::from(self.global.timeout)
    }

    /// Mount `volume` and return its mount path.
    ///
    /// Repeated mounts of an unlocked volume return the existing path. On a
    /// locked volume a repeated mount fails; the count it added is released
    /// by the matching `unmount` the container runtime sends after every
    /// failed mount.
    pub async fn mount(&self, volume: &str, unlocked: bool) -> Result<String> {
        info!(volume = %volume, unlocked, "Mounting volume");
        let ut = self.use_mount(volume);

        if !unlocked {
            self.lock
                .uses()
                .publish_use(&ut)
                .await
                .map_err(|e| VolpluginError::LockFailed(format!("mount {}: {}", volume, e)))?;
        }

        if self.counter.add(volume) > 1 {
            if unlocked {
                warn!(volume = %volume, "Duplicate mount detected: returning existing mount path");
                return self.driver.mount_path(volume).await;
            }

            warn!(volume = %volume, "Duplicate mount detected: lock failed");
            return Err(VolpluginError::LockFailed(format!(
                "duplicate mount of {}",
                volume
            )));
        }

        let mounted = match self.driver.mount(volume).await {
            Ok(mounted) => mounted,
            Err(e) => return Err(self.clear_mount(&ut, unlocked, e).await),
        };

        self.collection.add(mounted);

        if !unlocked && let Err(e) = self.start_ttl_refresh(&ut).await {
            self.refreshes.remove(volume).await;
            return Err(self.clear_mount(&ut, unlocked, e).await);
        }

        match self.driver.mount_path(volume).await {
            Ok(path) => Ok(path),
            Err(e) => {
                self.refreshes.remove(volume).await;
                Err(self.clear_mount(&ut, unlocked, e).await)
            }
        }
    }

    /// Unmount `volume` and return its mount path.
    ///
    /// The device is only unmounted, and the lock only cleared, when the last
    /// stacked mount goes away.
    pub async fn unmount(&self, volume: &str, unlocked: bool) -> Result<String> {
        info!(volume = %volume, unlocked, "Unmounting volume");
        let ut = self.use_mount(volume);

        if !unlocked {
            // the refresh must not outlive the permanent use taken below
            self.refreshes.remove(volume).await;

            self.lock
                .uses()
                .publish_use(&ut)
                .await
                .map_err(|e| VolpluginError::LockFailed(format!("unmount {}: {}", volume, e)))?;
        }

        if self.counter.sub(volume) > 0 {
            warn!(volume = %volume, "Duplicate unmount detected: ignoring and returning success");
            let path = self.driver.mount_path(volume).await?;

            if !unlocked {
                self.start_ttl_refresh(&ut).await?;
            }

            return Ok(path);
        }

        self.driver.unmount(volume).await?;
        self.collection.remove(volume);

        if !unlocked {
            self.lock.clear_lock(&ut, self.timeout()).await?;
        }

        self.driver.mount_path(volume).await
    }

    /// Rebuild local state from the devices the driver reports as mounted,
    /// typically after a restart.
    ///
    /// `counts` seeds each volume's mount count (1 when absent). Locked
    /// volumes get their TTL refresh back. Mounts already registered are
    /// left alone, so this may run more than once.
    pub async fn restore<F>(&self, counts: &HashMap<String, i64>, is_unlocked: F) -> Result<()>
    where
        F: Fn(&str) -> bool,
    {
        let mounted = self.driver.mounted(self.global.timeout).await?;

        for mount in mounted {
            let volume = mount.volume.clone();
            debug!(volume = %volume, device = %mount.device, "Found existing mount");

            if split_volume(&volume).is_err() {
                warn!(volume = %volume, "Invalid volume name in mount scan: skipping refresh");
                continue;
            }

            if self.collection.contains(&volume) {
                continue;
            }

            let count = counts.get(&volume).copied().unwrap_or(1);
            self.counter.add_count(&volume, count);
            self.collection.add(mount);

            if !is_unlocked(&volume) {
                self.start_ttl_refresh(&self.use_mount(&volume)).await?;
            }
        }

        Ok(())
    }

    /// Stop every TTL refresh this host runs. Uses are left to expire.
    pub async fn shutdown(&self) {
        self.refreshes.stop_all().await;
    }

    async fn start_ttl_refresh(&self, ut: &UseMount) -> Result<()> {
        let handle = self
            .lock
            .acquire_with_ttl_refresh(ut, self.global.ttl, self.timeout())
            .await?;

        self.refreshes.add(&ut.volume, handle).await;
        Ok(())
    }

    /// Undo a mount that failed partway: unmount the device, forget it, and
    /// release the lock. Returns the error to report.
    async fn clear_mount(&self, ut: &UseMount, unlocked: bool, cause: VolpluginError) -> VolpluginError {
        error!(volume = %ut.volume, "Mount failure: {}", cause);

        if let Err(e) = self.driver.unmount(&ut.volume).await {
            error!(volume = %ut.volume, "Failure during unmount after failed mount: {} ({})", e, cause);
        }

        self.collection.remove(&ut.volume);

        if unlocked {
            return cause;
        }

        match self.lock.clear_lock(ut, self.timeout()).await {
            Ok(()) => cause,
            Err(e) => VolpluginError::LockFailed(format!(
                "could not clear lock for {} after mount failure ({}): {}",
                ut.volume, cause, e
            )),
        }
    }
}
