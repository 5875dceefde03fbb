//! Volplugin Mount - host-local mount bookkeeping
//!
//! This crate provides:
//! - `MountCounter` for stacked mounts of the same volume
//! - `MountCollection`, the registry of live mounts
//! - The `MountDriver` storage capability and its `Mount` record
//! - `Mounter`, which sequences locking and bookkeeping around the driver

pub mod collection;
pub mod counter;
pub mod driver;
pub mod mounter;

pub use collection::MountCollection;
pub use counter::MountCounter;
pub use driver::{Mount, MountDriver};
pub use mounter::Mounter;
