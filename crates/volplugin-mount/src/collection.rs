//! Registry of live mounts on this host.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::info;

use volplugin_common::{Result, VolpluginError};

use crate::driver::Mount;

/// Live mounts keyed by volume name. At most one per volume.
#[derive(Debug, Default)]
pub struct MountCollection {
    mounts: Mutex<HashMap<String, Mount>>,
}

impl MountCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `mount`.
    ///
    /// # Panics
    ///
    /// Panics if a mount for the same volume is already registered. Callers
    /// hold the volume's use-lock, so a second registration means the lock
    /// was not respected.
    pub fn add(&self, mount: Mount) {
        let mut mounts = self.mounts.lock();

        if mounts.contains_key(&mount.volume) {
            let volume = mount.volume.clone();
            drop(mounts);
            panic!("Mount for {:?} already existed!", volume);
        }

        info!(volume = %mount.volume, path = %mount.path, "Adding mount");
        mounts.insert(mount.volume.clone(), mount);
    }

    /// Deregister `name`. Does nothing when it is not registered.
    pub fn remove(&self, name: &str) {
        match self.mounts.lock().remove(name) {
            Some(_) => info!(volume = %name, "Removed mount"),
            None => info!(volume = %name, "Mount not found for removal"),
        }
    }

    pub fn get(&self, name: &str) -> Result<Mount> {
        self.mounts
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| VolpluginError::NotExists(format!("Could not find mount for volume {}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.mounts.lock().contains_key(name)
    }

    /// Every registered mount, sorted by volume.
    pub fn list(&self) -> Vec<Mount> {
        let mut mounts: Vec<Mount> = self.mounts.lock().values().cloned().collect();
        mounts.sort_by(|a, b| a.volume.cmp(&b.volume));
        mounts
    }

    pub fn len(&self) -> usize {
        self.mounts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
