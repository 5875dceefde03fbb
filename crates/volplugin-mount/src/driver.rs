//! Storage backend capability used by the mount sequence.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use volplugin_common::Result;

/// A device mounted on this host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Mount {
    pub device: String,
    pub path: String,
    pub dev_major: u32,
    pub dev_minor: u32,
    /// `<policy>/<volume>`
    pub volume: String,
}

/// Performs the actual block and filesystem work for a volume.
///
/// Callers hold the volume's use-lock around `mount` and `unmount`.
#[async_trait]
pub trait MountDriver: Send + Sync {
    async fn mount(&self, volume: &str) -> Result<Mount>;

    async fn unmount(&self, volume: &str) -> Result<()>;

    /// Where `volume` is, or would be, mounted.
    async fn mount_path(&self, volume: &str) -> Result<String>;

    /// Every volume this backend currently has mounted, found within
    /// `timeout`.
    async fn mounted(&self, timeout: Duration) -> Result<Vec<Mount>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_serialize() {
        let mount = Mount {
            device: "/dev/rbd1".to_string(),
            path: "/mnt/ceph/policy/vol".to_string(),
            dev_major: 252,
            dev_minor: 16,
            volume: "policy/vol".to_string(),
        };

        let json = serde_json::to_value(&mount).unwrap();
        assert_eq!(json["Device"], "/dev/rbd1");
        assert_eq!(json["DevMinor"], 16);
        assert_eq!(json["Volume"], "policy/vol");
    }
}
