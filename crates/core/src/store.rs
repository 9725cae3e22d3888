//! Object store seam over one side (virtual or physical) of the sync.

use async_trait::async_trait;

use crate::{ObjectKey, SyncResult};

/// Typed CRUD over one API server.
///
/// `update` is conditional: implementations must reject the write with
/// [`SyncError::Conflict`](crate::SyncError::Conflict) when the object's
/// resourceVersion no longer matches the stored one. Status is only written
/// through `update_status`.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// `Ok(None)` when the object does not exist.
    async fn get(&self, key: &ObjectKey) -> SyncResult<Option<K>>;
    async fn list(&self, namespace: Option<&str>) -> SyncResult<Vec<K>>;
    async fn create(&self, obj: &K) -> SyncResult<K>;
    async fn update(&self, obj: &K) -> SyncResult<K>;
    async fn update_status(&self, obj: &K) -> SyncResult<K>;
    /// Deleting a missing object is not an error.
    async fn delete(&self, key: &ObjectKey) -> SyncResult<()>;
}
