//! Volplugin Lock - use-lock coordination
//!
//! This crate provides:
//! - The use-lock model: who holds a volume, and why
//! - `UseStore` for publishing uses through a key-value `Client`
//! - `LockDriver` for guarded execution, retries, and TTL refresh
//! - `HeartbeatClient` for reporting mounts to the coordinator

pub mod driver;
pub mod error;
pub mod heartbeat;
pub mod reason;
pub mod registry;
pub mod store;
pub mod uses;

pub use driver::{LockDriver, RETRY_INTERVAL, RefreshHandle, Timeout, jitter};
pub use error::HeartbeatError;
pub use heartbeat::HeartbeatClient;
pub use reason::Reason;
pub use registry::StopRegistry;
pub use store::UseStore;
pub use uses::{UseLocker, UseMount, UseSnapshot, UseType, UseVolsupervisor};
