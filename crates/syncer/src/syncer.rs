//! The per-kind plugin contract.

use std::sync::Arc;

use async_trait::async_trait;
use kube::Resource;
use vsync_core::{OwnershipTable, SyncOptions, SyncResult};
use vsync_translate::TranslateContext;

/// What happens to a managed host object whose virtual object is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
    #[default]
    Delete,
    /// Leave it in place so a re-created virtual object links up with it again.
    Adopt,
}

/// Options and translation state handed to every syncer call.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub options: Arc<SyncOptions>,
    pub translate: TranslateContext,
}

impl SyncContext {
    pub fn new(options: Arc<SyncOptions>) -> Self {
        let translate = TranslateContext::from_options(&options);
        Self { options, translate }
    }
}

/// Translation hooks for one resource kind.
///
/// `translate*` functions never mutate their inputs; a `Some` result is a
/// complete object ready for a conditional write, `None` means no change.
#[async_trait]
pub trait ResourceSyncer<K>: Send + Sync
where
    K: Resource + Send + Sync + 'static,
{
    fn name(&self) -> &str;

    fn is_enabled(&self, _options: &SyncOptions) -> bool {
        true
    }

    fn ownership(&self) -> &OwnershipTable;

    fn orphan_policy(&self) -> OrphanPolicy {
        OrphanPolicy::Delete
    }

    /// Physical object for first creation. Fails with `SyncError::Validation`
    /// when a required field cannot be resolved.
    async fn translate(&self, ctx: &SyncContext, v_obj: &K) -> SyncResult<K>;

    /// Forward patch (virtual → physical) for virtual-authoritative fields.
    async fn translate_update(&self, ctx: &SyncContext, p_obj: &K, v_obj: &K) -> SyncResult<Option<K>>;

    /// Backward patch (physical → virtual) for physical-authoritative fields.
    fn translate_update_backwards(&self, ctx: &SyncContext, p_obj: &K, v_obj: &K) -> Option<K>;

    /// Status copy-back, written through the virtual status subresource.
    fn translate_status_backwards(&self, _p_obj: &K, _v_obj: &K) -> Option<K> {
        None
    }
}
