//! Volplugin KV - key-value store abstraction
//!
//! This crate provides:
//! - `PathBuilder` for store-flavor agnostic key paths
//! - The `Client` contract with CAS, TTL, and watch semantics
//! - The `Entity` capability for values that know their own path
//! - `MemoryClient`, a complete in-process store

pub mod client;
pub mod entity;
pub mod global;
pub mod memory;
pub mod pather;

pub use client::{
    Client, DeleteOptions, DumpFormat, ExistPolicy, GetOptions, Node, Notifier, SetOptions,
    WatchHandler, forward_handler,
};
pub use entity::{Entity, delete_entity, publish_entity};
pub use global::{get_global, publish_global};
pub use memory::MemoryClient;
pub use pather::PathBuilder;
