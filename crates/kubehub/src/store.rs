//! [`ObjectStore`] over the Kubernetes API.
//!
//! Requests go through `Api<DynamicObject>` with the kind's erased
//! `ApiResource`, so one implementation serves namespaced and cluster-scoped
//! kinds alike. Objects are converted to and from the typed form with serde.

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::{Client, Resource};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;
use vsync_core::{ObjectKey, ObjectStore, SyncError, SyncResult};

pub struct KubeStore<K> {
    client: Client,
    ar: ApiResource,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = ()>,
{
    pub fn new(client: Client) -> Self {
        Self { client, ar: ApiResource::erase::<K>(&()), _kind: PhantomData }
    }

    fn api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &self.ar),
            None => Api::all_with(self.client.clone(), &self.ar),
        }
    }
}

fn to_dynamic<K: Serialize>(obj: &K) -> SyncResult<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn from_dynamic<K: DeserializeOwned>(obj: DynamicObject) -> SyncResult<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn key_of<K: Resource>(obj: &K) -> SyncResult<ObjectKey> {
    ObjectKey::from_meta(obj.meta()).ok_or_else(|| SyncError::Validation("metadata.name is required".into()))
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> SyncResult<Option<K>> {
        match self.api(key.namespace()).get_opt(&key.name).await? {
            Some(o) => Ok(Some(from_dynamic(o)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, namespace: Option<&str>) -> SyncResult<Vec<K>> {
        let list = self.api(namespace).list(&ListParams::default()).await?;
        list.items.into_iter().map(from_dynamic::<K>).collect()
    }

    async fn create(&self, obj: &K) -> SyncResult<K> {
        let key = key_of(obj)?;
        debug!(kind = %self.ar.kind, key = %key, "create");
        let created = self.api(key.namespace()).create(&PostParams::default(), &to_dynamic(obj)?).await?;
        from_dynamic(created)
    }

    async fn update(&self, obj: &K) -> SyncResult<K> {
        let key = key_of(obj)?;
        debug!(kind = %self.ar.kind, key = %key, rv = ?obj.meta().resource_version, "replace");
        let updated = self
            .api(key.namespace())
            .replace(&key.name, &PostParams::default(), &to_dynamic(obj)?)
            .await?;
        from_dynamic(updated)
    }

    async fn update_status(&self, obj: &K) -> SyncResult<K> {
        let key = key_of(obj)?;
        debug!(kind = %self.ar.kind, key = %key, "replace status");
        let body = serde_json::to_vec(&to_dynamic(obj)?)?;
        let updated = self.api(key.namespace()).replace_status(&key.name, &PostParams::default(), body).await?;
        from_dynamic(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> SyncResult<()> {
        debug!(kind = %self.ar.kind, key = %key, "delete");
        match self.api(key.namespace()).delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match SyncError::from(e) {
                SyncError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }
}
