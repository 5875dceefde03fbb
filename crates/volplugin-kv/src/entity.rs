//! Objects that know where they live in the store.

use volplugin_common::Result;

use crate::client::{Client, DeleteOptions, SetOptions};
use crate::pather::PathBuilder;

/// A value with a home in the key-value store.
pub trait Entity: Send + Sync {
    /// Full path of this entity under `root`.
    fn path(&self, root: &PathBuilder) -> Result<PathBuilder>;

    /// Bytes written at [`Entity::path`].
    fn payload(&self) -> Result<Vec<u8>>;
}

/// Write `entity` at its path under the client's root.
pub async fn publish_entity<C, E>(client: &C, entity: &E, opts: &SetOptions) -> Result<()>
where
    C: Client + ?Sized,
    E: Entity + ?Sized,
{
    let path = entity.path(client.path())?;
    let payload = entity.payload()?;
    client.set(&path, &payload, opts).await
}

/// Remove `entity` from the store.
pub async fn delete_entity<C, E>(client: &C, entity: &E, opts: &DeleteOptions) -> Result<()>
where
    C: Client + ?Sized,
    E: Entity + ?Sized,
{
    let path = entity.path(client.path())?;
    client.delete(&path, opts).await
}
