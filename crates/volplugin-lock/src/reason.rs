//! Why a use-lock is held.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use volplugin_common::VolpluginError;

/// Purpose of a use-lock. Serialized with the exact names below.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    Create,
    Mount,
    Remove,
    Snapshot,
    SnapshotPrune,
    Copy,
    Maintenance,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Create => "Create",
            Reason::Mount => "Mount",
            Reason::Remove => "Remove",
            Reason::Snapshot => "Snapshot",
            Reason::SnapshotPrune => "SnapshotPrune",
            Reason::Copy => "Copy",
            Reason::Maintenance => "Maintenance",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reason {
    type Err = VolpluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Create" => Ok(Reason::Create),
            "Mount" => Ok(Reason::Mount),
            "Remove" => Ok(Reason::Remove),
            "Snapshot" => Ok(Reason::Snapshot),
            "SnapshotPrune" => Ok(Reason::SnapshotPrune),
            "Copy" => Ok(Reason::Copy),
            "Maintenance" => Ok(Reason::Maintenance),
            other => Err(VolpluginError::Internal(format!(
                "unknown lock reason: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&Reason::SnapshotPrune).unwrap(),
            "\"SnapshotPrune\""
        );
        assert_eq!(
            serde_json::from_str::<Reason>("\"Maintenance\"").unwrap(),
            Reason::Maintenance
        );
        assert_eq!(Reason::Copy.to_string(), "Copy");
    }

    #[test]
    fn test_reason_parse() {
        assert_eq!("Create".parse::<Reason>().unwrap(), Reason::Create);
        assert!("create".parse::<Reason>().is_err());
    }
}
