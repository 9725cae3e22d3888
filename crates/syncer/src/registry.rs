//! Kind-keyed dispatch table of type-erased controllers.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use kube::Resource;
use rustc_hash::FxHashMap;
use tracing::{info, warn};
use vsync_core::{ObjectKey, ReconcileOutcome, ReconcileRequest, SyncOptions, SyncResult};

use crate::controller::SyncController;

/// Object-safe face of a [`SyncController`] so one registry can hold many kinds.
#[async_trait]
pub trait KindReconciler: Send + Sync {
    fn kind(&self) -> &str;
    async fn reconcile(&self, key: &ObjectKey) -> SyncResult<ReconcileOutcome>;
    async fn sweep_orphans(&self) -> SyncResult<usize>;
}

#[derive(Default)]
pub struct SyncRegistry {
    by_kind: FxHashMap<String, Arc<dyn KindReconciler>>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `controller` unless its syncer is disabled by `options` or its
    /// ownership table is invalid. Returns whether it was kept.
    pub fn register<K>(&mut self, controller: SyncController<K>, options: &SyncOptions) -> bool
    where
        K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static,
    {
        let name = controller.syncer().name().to_string();
        if !controller.syncer().is_enabled(options) {
            info!(syncer = %name, "syncer disabled");
            return false;
        }
        if let Err(e) = controller.syncer().ownership().validate() {
            warn!(syncer = %name, error = %e, "invalid ownership table; syncer not registered");
            return false;
        }
        let kind = KindReconciler::kind(&controller).to_string();
        if self.by_kind.insert(kind.clone(), Arc::new(controller)).is_some() {
            warn!(kind = %kind, "replaced existing controller");
        }
        info!(syncer = %name, kind = %kind, "syncer registered");
        true
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn KindReconciler>> {
        self.by_kind.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut out: Vec<String> = self.by_kind.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }

    /// Clean up host objects whose virtual owner vanished while nothing was
    /// watching. Failures are logged per kind.
    pub async fn sweep_orphans(&self) -> usize {
        let mut total = 0;
        for kind in self.kinds() {
            if let Some(c) = self.get(&kind) {
                match c.sweep_orphans().await {
                    Ok(n) => total += n,
                    Err(e) => warn!(kind = %kind, error = %e, "orphan sweep failed"),
                }
            }
        }
        total
    }

    /// Route one request; unknown kinds are dropped with a warning.
    pub async fn dispatch(&self, req: &ReconcileRequest) -> SyncResult<ReconcileOutcome> {
        match self.by_kind.get(&req.kind) {
            Some(c) => c.reconcile(&req.key).await,
            None => {
                warn!(kind = %req.kind, key = %req.key, "no controller for kind");
                Ok(ReconcileOutcome::Done)
            }
        }
    }
}
