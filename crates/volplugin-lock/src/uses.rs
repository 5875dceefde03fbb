//! Use-lock model.
//!
//! A "use" is a key recording that a host is doing something with a volume.
//! Uses live at `<root>/users/<type>/<policy>/<volume>` and their value is
//! the JSON form of the holder, which doubles as the compare-and-swap token:
//! only a writer with a byte-identical payload can refresh or remove it.

use std::fmt;

use serde::{Deserialize, Serialize};

use volplugin_common::{Result, VolpluginError};
use volplugin_kv::{Entity, PathBuilder};

use crate::reason::Reason;

/// Root segment for every use-lock.
pub const USE_ROOT: &str = "users";

/// Volume name used by the supervisor singleton lock.
pub const VOLSUPERVISOR_VOLUME: &str = "volsupervisor";

/// Kind of use-lock, and the path segment it lives under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UseType {
    Mount,
    Snapshot,
    Volsupervisor,
}

impl UseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UseType::Mount => "mount",
            UseType::Snapshot => "snapshot",
            UseType::Volsupervisor => "volsupervisor",
        }
    }
}

impl fmt::Display for UseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and purpose of a lock holder.
pub trait UseLocker: Entity + fmt::Debug {
    /// Volume this lock is about, `<policy>/<volume>` for volume locks.
    fn volume(&self) -> &str;

    /// Why the lock is held. `None` for locks without a reason.
    fn reason(&self) -> Option<Reason>;

    fn lock_type(&self) -> UseType;

    /// Whether publishing may find the key already present and take it over
    /// when the stored payload is identical.
    fn may_exist(&self) -> bool;
}

/// Split and validate a `<policy>/<volume>` name.
pub fn split_volume(volume: &str) -> Result<(&str, &str)> {
    match volume.split_once('/') {
        Some((policy, name))
            if !policy.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((policy, name))
        }
        _ => Err(VolpluginError::InvalidVolume(volume.to_string())),
    }
}

/// Directory holding every use of `lock_type`.
pub fn use_dir(root: &PathBuilder, lock_type: UseType) -> Result<PathBuilder> {
    root.append(&[USE_ROOT, lock_type.as_str()])
}

/// Full key of the use of `lock_type` on `volume`.
pub fn use_path(root: &PathBuilder, lock_type: UseType, volume: &str) -> Result<PathBuilder> {
    let dir = use_dir(root, lock_type)?;

    match lock_type {
        UseType::Volsupervisor => dir.append(&[volume]),
        UseType::Mount | UseType::Snapshot => {
            let (policy, name) = split_volume(volume)?;
            dir.append(&[policy, name])
        }
    }
}

/// A host using a volume: mounting it, creating it, removing it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UseMount {
    pub volume: String,
    pub hostname: String,
    pub reason: Reason,
}

impl UseMount {
    pub fn new(volume: impl Into<String>, hostname: impl Into<String>, reason: Reason) -> Self {
        Self {
            volume: volume.into(),
            hostname: hostname.into(),
            reason,
        }
    }
}

impl Entity for UseMount {
    fn path(&self, root: &PathBuilder) -> Result<PathBuilder> {
        use_path(root, self.lock_type(), &self.volume)
    }

    fn payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl UseLocker for UseMount {
    fn volume(&self) -> &str {
        &self.volume
    }

    fn reason(&self) -> Option<Reason> {
        Some(self.reason)
    }

    fn lock_type(&self) -> UseType {
        UseType::Mount
    }

    fn may_exist(&self) -> bool {
        true
    }
}

/// Snapshot activity on a volume. Blocks other snapshot work and removal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UseSnapshot {
    pub volume: String,
    pub reason: Reason,
}

impl UseSnapshot {
    pub fn new(volume: impl Into<String>, reason: Reason) -> Self {
        Self {
            volume: volume.into(),
            reason,
        }
    }
}

impl Entity for UseSnapshot {
    fn path(&self, root: &PathBuilder) -> Result<PathBuilder> {
        use_path(root, self.lock_type(), &self.volume)
    }

    fn payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl UseLocker for UseSnapshot {
    fn volume(&self) -> &str {
        &self.volume
    }

    fn reason(&self) -> Option<Reason> {
        Some(self.reason)
    }

    fn lock_type(&self) -> UseType {
        UseType::Snapshot
    }

    fn may_exist(&self) -> bool {
        false
    }
}

/// Singleton lock on the supervisor process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UseVolsupervisor {
    pub hostname: String,
}

impl UseVolsupervisor {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }
}

impl Entity for UseVolsupervisor {
    fn path(&self, root: &PathBuilder) -> Result<PathBuilder> {
        use_path(root, self.lock_type(), VOLSUPERVISOR_VOLUME)
    }

    fn payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl UseLocker for UseVolsupervisor {
    fn volume(&self) -> &str {
        VOLSUPERVISOR_VOLUME
    }

    fn reason(&self) -> Option<Reason> {
        None
    }

    fn lock_type(&self) -> UseType {
        UseType::Volsupervisor
    }

    fn may_exist(&self) -> bool {
        false
    }
}
