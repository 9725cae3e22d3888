//! Kubernetes Event emission seam.
//!
//! Recording is fire-and-forget: implementations log failures and never let
//! them reach the reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// Well-known reasons emitted by the engine.
pub mod reasons {
    /// Translation failed; the object stays pending until the user fixes it.
    pub const SYNC_ERROR: &str = "SyncError";
    /// A host object with the translated name exists but belongs to someone else.
    pub const SYNC_CONFLICT: &str = "SyncConflict";
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, target: &ObjectReference, type_: EventType, reason: &str, message: &str);
}

pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn record(&self, _target: &ObjectReference, _type_: EventType, _reason: &str, _message: &str) {}
}
