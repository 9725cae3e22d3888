//! In-memory [`ObjectStore`] with API-server semantics: resource versions,
//! conditional updates, a separate status write path and finalizer-aware
//! deletion. Used for dry runs and as the fake in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Resource;
use rustc_hash::FxHashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;
use vsync_core::{ObjectKey, ObjectStore, SyncError, SyncResult};

/// Store operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

pub struct MemStore<K> {
    objects: Mutex<FxHashMap<ObjectKey, K>>,
    injected: Mutex<VecDeque<(Op, SyncError)>>,
    rv: AtomicU64,
    writes: AtomicU64,
}

impl<K> Default for MemStore<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(FxHashMap::default()),
            injected: Mutex::new(VecDeque::new()),
            rv: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }
}

impl<K> MemStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, FxHashMap<ObjectKey, K>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_rv(&self) -> String {
        (self.rv.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Seed an object as-is (status included), assigning uid and resourceVersion.
    pub fn insert(&self, mut obj: K) -> K {
        let key = key_of(&obj).unwrap_or_else(|_| ObjectKey::cluster(""));
        let meta = obj.meta_mut();
        meta.uid.get_or_insert_with(|| Uuid::new_v4().to_string());
        meta.resource_version = Some(self.next_rv());
        self.objects().insert(key, obj.clone());
        obj
    }

    pub fn get_now(&self, key: &ObjectKey) -> Option<K> {
        self.objects().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful mutating calls so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Fail the next call of `op` with `err`.
    pub fn fail_next(&self, op: Op, err: SyncError) {
        self.injected.lock().unwrap_or_else(|e| e.into_inner()).push_back((op, err));
    }

    fn injected(&self, op: Op) -> SyncResult<()> {
        let mut q = self.injected.lock().unwrap_or_else(|e| e.into_inner());
        match q.iter().position(|(o, _)| *o == op) {
            Some(i) => Err(q.remove(i).map(|(_, e)| e).unwrap_or_else(|| SyncError::Transport("injected".into()))),
            None => Ok(()),
        }
    }

    fn check_rv(stored: &K, incoming: &K, key: &ObjectKey) -> SyncResult<()> {
        match incoming.meta().resource_version.as_deref() {
            Some(rv) if Some(rv) != stored.meta().resource_version.as_deref() => Err(SyncError::Conflict(format!(
                "{}: resourceVersion {} is stale (stored {})",
                key,
                rv,
                stored.meta().resource_version.as_deref().unwrap_or("")
            ))),
            _ => Ok(()),
        }
    }
}

fn key_of<K: Resource>(obj: &K) -> SyncResult<ObjectKey> {
    ObjectKey::from_meta(obj.meta()).ok_or_else(|| SyncError::Validation("metadata.name is required".into()))
}

/// `target` with its `status` replaced by `status` (removed when `None`).
fn with_status<K: Serialize + DeserializeOwned>(target: &K, status: Option<Json>) -> SyncResult<K> {
    let mut v = serde_json::to_value(target)?;
    if let Some(obj) = v.as_object_mut() {
        match status {
            Some(s) if !s.is_null() => {
                obj.insert("status".into(), s);
            }
            _ => {
                obj.remove("status");
            }
        }
    }
    Ok(serde_json::from_value(v)?)
}

fn status_of<K: Serialize>(obj: &K) -> SyncResult<Option<Json>> {
    Ok(serde_json::to_value(obj)?.get("status").cloned())
}

#[async_trait]
impl<K> ObjectStore<K> for MemStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> SyncResult<Option<K>> {
        self.injected(Op::Get)?;
        Ok(self.get_now(key))
    }

    async fn list(&self, namespace: Option<&str>) -> SyncResult<Vec<K>> {
        self.injected(Op::List)?;
        let g = self.objects();
        let mut items: Vec<(&ObjectKey, &K)> = g
            .iter()
            .filter(|(k, _)| namespace.map(|ns| k.namespace == ns).unwrap_or(true))
            .collect();
        items.sort_by(|a, b| a.0.cmp(b.0));
        Ok(items.into_iter().map(|(_, v)| v.clone()).collect())
    }

    async fn create(&self, obj: &K) -> SyncResult<K> {
        self.injected(Op::Create)?;
        let key = key_of(obj)?;
        let mut created = with_status(obj, None)?;
        let meta = created.meta_mut();
        meta.uid = Some(Uuid::new_v4().to_string());
        meta.resource_version = Some(self.next_rv());
        meta.creation_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        meta.deletion_timestamp = None;
        let mut g = self.objects();
        if g.contains_key(&key) {
            return Err(SyncError::AlreadyExists(key.to_string()));
        }
        g.insert(key, created.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn update(&self, obj: &K) -> SyncResult<K> {
        self.injected(Op::Update)?;
        let key = key_of(obj)?;
        let mut g = self.objects();
        let stored = g.get(&key).ok_or_else(|| SyncError::NotFound(key.to_string()))?;
        Self::check_rv(stored, obj, &key)?;
        let mut next = with_status(obj, status_of(stored)?)?;
        let smeta = stored.meta().clone();
        let meta = next.meta_mut();
        meta.uid = smeta.uid;
        meta.creation_timestamp = smeta.creation_timestamp;
        meta.deletion_timestamp = smeta.deletion_timestamp;
        meta.resource_version = Some(self.next_rv());
        self.writes.fetch_add(1, Ordering::SeqCst);
        let finished = meta.deletion_timestamp.is_some() && meta.finalizers.as_ref().map(|f| f.is_empty()).unwrap_or(true);
        if finished {
            g.remove(&key);
        } else {
            g.insert(key, next.clone());
        }
        Ok(next)
    }

    async fn update_status(&self, obj: &K) -> SyncResult<K> {
        self.injected(Op::UpdateStatus)?;
        let key = key_of(obj)?;
        let mut g = self.objects();
        let stored = g.get(&key).ok_or_else(|| SyncError::NotFound(key.to_string()))?;
        Self::check_rv(stored, obj, &key)?;
        let mut next = with_status(stored, status_of(obj)?)?;
        next.meta_mut().resource_version = Some(self.next_rv());
        g.insert(key, next.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(next)
    }

    async fn delete(&self, key: &ObjectKey) -> SyncResult<()> {
        self.injected(Op::Delete)?;
        let mut g = self.objects();
        let Some(stored) = g.get_mut(key) else { return Ok(()) };
        let has_finalizers = stored.meta().finalizers.as_ref().map(|f| !f.is_empty()).unwrap_or(false);
        if has_finalizers {
            if stored.meta().deletion_timestamp.is_none() {
                let meta = stored.meta_mut();
                meta.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
                meta.resource_version = Some(self.next_rv());
            }
        } else {
            g.remove(key);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
