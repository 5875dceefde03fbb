//! Per-volume mount reference counts.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

/// Counts how many times each volume is mounted on this host.
///
/// Stacked mounts of the same volume share one device mount; only the
/// transition to and from zero touches the device.
#[derive(Debug, Default)]
pub struct MountCounter {
    counts: Mutex<HashMap<String, i64>>,
}

impl MountCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> i64 {
        self.counts.lock().get(name).copied().unwrap_or(0)
    }

    /// Increment the count for `name` and return the new value.
    pub fn add(&self, name: &str) -> i64 {
        self.add_count(name, 1)
    }

    /// Add `count` to `name` and return the new value. Used to seed counts
    /// for mounts found at startup.
    pub fn add_count(&self, name: &str, count: i64) -> i64 {
        let mut counts = self.counts.lock();
        let entry = counts.entry(name.to_string()).or_insert(0);
        *entry += count;

        debug!(volume = %name, count = *entry, "Mount count increased");
        *entry
    }

    /// Decrement the count for `name` and return the new value.
    ///
    /// # Panics
    ///
    /// Panics when the count would drop below zero: more unmounts than mounts
    /// were recorded and the bookkeeping can no longer be trusted.
    pub fn sub(&self, name: &str) -> i64 {
        let mut counts = self.counts.lock();
        let entry = counts.entry(name.to_string()).or_insert(0);
        *entry -= 1;
        let count = *entry;

        if count < 0 {
            drop(counts);
            panic!(
                "Assertion failed while tracking unmount: mount count for {:?} is less than 0",
                name
            );
        }

        if count == 0 {
            counts.remove(name);
        }

        debug!(volume = %name, count, "Mount count decreased");
        count
    }

    /// Snapshot of every non-zero count.
    pub fn counts(&self) -> HashMap<String, i64> {
        self.counts.lock().clone()
    }
}
