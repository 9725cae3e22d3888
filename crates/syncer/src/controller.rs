//! Per-kind reconcile state machine.
//!
//! One pass loads the virtual object and its translated host counterpart,
//! classifies the pair into a [`SyncState`] and performs at most one create or
//! delete, or the forward patch, backward patch and status copy-back.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use kube::Resource;
use tracing::{debug, info, warn, Instrument};
use vsync_core::events::reasons;
use vsync_core::{ErrorClass, EventSink, EventType, ObjectKey, ObjectStore, ReconcileOutcome, SyncError, SyncResult};
use vsync_translate::{is_managed_by, virtual_key_of};

use crate::registry::KindReconciler;
use crate::syncer::{OrphanPolicy, ResourceSyncer, SyncContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    BothAbsent,
    VirtualOnly,
    PhysicalOnly,
    BothPresent,
}

impl SyncState {
    pub fn of(virtual_present: bool, physical_present: bool) -> Self {
        match (virtual_present, physical_present) {
            (false, false) => SyncState::BothAbsent,
            (true, false) => SyncState::VirtualOnly,
            (false, true) => SyncState::PhysicalOnly,
            (true, true) => SyncState::BothPresent,
        }
    }
}

pub struct SyncController<K> {
    kind: String,
    syncer: Arc<dyn ResourceSyncer<K>>,
    ctx: SyncContext,
    virtual_store: Arc<dyn ObjectStore<K>>,
    physical_store: Arc<dyn ObjectStore<K>>,
    events: Arc<dyn EventSink>,
}

impl<K> SyncController<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static,
{
    pub fn new(
        syncer: Arc<dyn ResourceSyncer<K>>,
        ctx: SyncContext,
        virtual_store: Arc<dyn ObjectStore<K>>,
        physical_store: Arc<dyn ObjectStore<K>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { kind: K::kind(&()).into_owned(), syncer, ctx, virtual_store, physical_store, events }
    }

    pub fn syncer(&self) -> &Arc<dyn ResourceSyncer<K>> {
        &self.syncer
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Drive the pair addressed by `vkey` one step towards convergence.
    pub async fn reconcile(&self, vkey: &ObjectKey) -> SyncResult<ReconcileOutcome> {
        let pkey = self.ctx.translate.physical_key(vkey);
        let span = tracing::debug_span!("reconcile", kind = %self.kind, key = %vkey, physical = %pkey);
        self.reconcile_pair(vkey, &pkey).instrument(span).await
    }

    async fn reconcile_pair(&self, vkey: &ObjectKey, pkey: &ObjectKey) -> SyncResult<ReconcileOutcome> {
        let v_obj = self.virtual_store.get(vkey).await?;
        let p_obj = self.physical_store.get(pkey).await?;

        let deleting = v_obj.as_ref().map(|v| v.meta().deletion_timestamp.is_some()).unwrap_or(false);
        let v_live = v_obj.filter(|_| !deleting);
        let state = SyncState::of(v_live.is_some(), p_obj.is_some());
        debug!(?state, deleting, "classified");

        match (state, v_live, p_obj) {
            (SyncState::VirtualOnly, Some(v), None) => self.create(vkey, pkey, v).await,
            (SyncState::PhysicalOnly, None, Some(p)) => self.orphaned(vkey, pkey, &p, deleting).await,
            (SyncState::BothPresent, Some(v), Some(p)) => self.sync_pair(vkey, v, p).await,
            _ => Ok(ReconcileOutcome::Done),
        }
    }

    async fn create(&self, vkey: &ObjectKey, pkey: &ObjectKey, v: K) -> SyncResult<ReconcileOutcome> {
        let desired = match self.syncer.translate(&self.ctx, &v).await {
            Ok(d) => d,
            Err(e) => return Err(self.report(&v, e).await),
        };
        match self.physical_store.create(&desired).await {
            Ok(_) => {
                metrics::counter!("sync_created_total", 1u64, "kind" => self.kind.clone());
                info!(syncer = self.syncer.name(), "created physical object");
                Ok(ReconcileOutcome::Done)
            }
            Err(e) if e.is_already_exists() => {
                debug!("lost create race; re-reading physical object");
                match self.physical_store.get(pkey).await? {
                    Some(p) => self.sync_pair(vkey, v, p).await,
                    None => Err(SyncError::Conflict(format!("{} vanished after create conflict", pkey))),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn orphaned(&self, vkey: &ObjectKey, pkey: &ObjectKey, p: &K, deleting: bool) -> SyncResult<ReconcileOutcome> {
        if !is_managed_by(p.meta(), &self.ctx.translate, vkey) {
            debug!("physical object is not ours; leaving it alone");
            return Ok(ReconcileOutcome::Done);
        }
        if !deleting && self.syncer.orphan_policy() == OrphanPolicy::Adopt {
            debug!("keeping orphaned physical object for adoption");
            return Ok(ReconcileOutcome::Done);
        }
        match self.physical_store.delete(pkey).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        metrics::counter!("sync_deleted_total", 1u64, "kind" => self.kind.clone());
        info!(syncer = self.syncer.name(), "deleted physical object");
        Ok(ReconcileOutcome::Done)
    }

    async fn sync_pair(&self, vkey: &ObjectKey, v: K, p: K) -> SyncResult<ReconcileOutcome> {
        if !is_managed_by(p.meta(), &self.ctx.translate, vkey) {
            let msg = format!(
                "host object {} exists but is not managed by this virtual cluster",
                p.meta().name.as_deref().unwrap_or_default()
            );
            warn!("{}", msg);
            self.events.record(&v.object_ref(&()), EventType::Warning, reasons::SYNC_CONFLICT, &msg).await;
            return Ok(ReconcileOutcome::Done);
        }

        let mut p = p;
        let mut v = v;
        let forward = match self.syncer.translate_update(&self.ctx, &p, &v).await {
            Ok(f) => f,
            Err(e) => return Err(self.report(&v, e).await),
        };
        if let Some(patch) = forward {
            p = self.physical_store.update(&patch).await?;
            metrics::counter!("sync_forward_patches_total", 1u64, "kind" => self.kind.clone());
            debug!("applied forward patch");
        }
        if let Some(patch) = self.syncer.translate_update_backwards(&self.ctx, &p, &v) {
            v = self.virtual_store.update(&patch).await?;
            metrics::counter!("sync_backward_patches_total", 1u64, "kind" => self.kind.clone());
            debug!("applied backward patch");
        }
        if let Some(patch) = self.syncer.translate_status_backwards(&p, &v) {
            self.virtual_store.update_status(&patch).await?;
            debug!("copied status back");
        }
        Ok(ReconcileOutcome::Done)
    }

    /// Reconcile every managed host object whose virtual owner no longer
    /// exists. Returns how many were handled.
    pub async fn sweep_orphans(&self) -> SyncResult<usize> {
        let namespace = self.ctx.options.target_namespace.clone();
        let mut swept = 0;
        for p in self.physical_store.list(Some(&namespace)).await? {
            let Some(vkey) = virtual_key_of(p.meta()) else { continue };
            if !is_managed_by(p.meta(), &self.ctx.translate, &vkey) {
                continue;
            }
            if self.virtual_store.get(&vkey).await?.is_some() {
                continue;
            }
            self.reconcile(&vkey).await?;
            swept += 1;
        }
        if swept > 0 {
            info!(kind = %self.kind, swept, "swept orphaned physical objects");
        }
        Ok(swept)
    }

    /// Surface validation failures on the virtual object before handing the error up.
    async fn report(&self, v: &K, err: SyncError) -> SyncError {
        if err.class() == ErrorClass::Validation {
            self.events
                .record(&v.object_ref(&()), EventType::Warning, reasons::SYNC_ERROR, &err.to_string())
                .await;
        }
        err
    }
}

#[async_trait]
impl<K> KindReconciler for SyncController<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn reconcile(&self, key: &ObjectKey) -> SyncResult<ReconcileOutcome> {
        SyncController::reconcile(self, key).await
    }

    async fn sweep_orphans(&self) -> SyncResult<usize> {
        SyncController::sweep_orphans(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_covers_all_presence_pairs() {
        assert_eq!(SyncState::of(false, false), SyncState::BothAbsent);
        assert_eq!(SyncState::of(true, false), SyncState::VirtualOnly);
        assert_eq!(SyncState::of(false, true), SyncState::PhysicalOnly);
        assert_eq!(SyncState::of(true, true), SyncState::BothPresent);
    }
}
