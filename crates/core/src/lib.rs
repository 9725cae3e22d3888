//! vsync core types shared by every crate in the workspace.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod error;
pub mod events;
pub mod options;
pub mod ownership;
pub mod store;

pub use error::{ErrorClass, SyncError, SyncResult};
pub use events::{EventSink, EventType, NoopEventSink};
pub use options::SyncOptions;
pub use ownership::{Authority, FieldRule, OwnershipError, OwnershipTable};
pub use store::ObjectStore;

/// Well-known label and annotation keys written by the engine.
pub mod markers {
    /// Label carrying the suffix of the virtual cluster that owns a physical object.
    pub const MANAGED_BY_LABEL: &str = "vsync.dev/managed-by";
    /// Label carrying the virtual namespace of a physical object.
    pub const NAMESPACE_LABEL: &str = "vsync.dev/namespace";
    /// Annotation with the virtual object's name.
    pub const OBJECT_NAME_ANNOTATION: &str = "vsync.dev/object-name";
    /// Annotation with the virtual object's namespace (absent for cluster-scoped kinds).
    pub const OBJECT_NAMESPACE_ANNOTATION: &str = "vsync.dev/object-namespace";
    /// Comma separated annotation keys that were copied down from the virtual object.
    pub const MANAGED_ANNOTATIONS_ANNOTATION: &str = "vsync.dev/managed-annotations";
    /// Comma separated label keys that were copied down from the virtual object.
    pub const MANAGED_LABELS_ANNOTATION: &str = "vsync.dev/managed-labels";
    /// Default per-object opt-out of selector and volume name translation.
    pub const DEFAULT_SKIP_TRANSLATION_ANNOTATION: &str = "vsync.dev/skip-translate";
    /// Finalizer held on virtual objects until their host counterpart is gone.
    pub const CLEANUP_FINALIZER: &str = "vsync.dev/cleanup";
    /// Prefix reserved for engine-owned keys.
    pub const PREFIX: &str = "vsync.dev/";

    /// Annotations that never travel to the host.
    pub const STRIPPED_ANNOTATIONS: &[&str] = &["kubectl.kubernetes.io/last-applied-configuration"];
}

/// Namespace/name pair addressing one object on either side.
///
/// Cluster-scoped objects use an empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self { namespace: String::new(), name: name.into() }
    }

    pub fn namespace(&self) -> Option<&str> {
        if self.namespace.is_empty() { None } else { Some(self.namespace.as_str()) }
    }

    /// Key of an object from its metadata; `None` when the object has no name.
    pub fn from_meta(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> Option<Self> {
        let name = meta.name.clone()?;
        Some(Self { namespace: meta.namespace.clone().unwrap_or_default(), name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// A unit of work for the sync engine: reconcile `key` of resource `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReconcileRequest {
    pub kind: String,
    pub key: ObjectKey,
}

impl ReconcileRequest {
    pub fn new(kind: impl Into<String>, key: ObjectKey) -> Self {
        Self { kind: kind.into(), key }
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// What the state machine wants done with a key after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Done,
    RequeueAfter(std::time::Duration),
}

pub mod prelude {
    pub use super::{
        markers, Authority, ErrorClass, EventSink, EventType, FieldRule, ObjectKey, ObjectStore,
        OwnershipTable, ReconcileOutcome, ReconcileRequest, SyncError, SyncOptions, SyncResult,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_display_omits_empty_namespace() {
        assert_eq!(ObjectKey::new("ns1", "test").to_string(), "ns1/test");
        assert_eq!(ObjectKey::cluster("fast").to_string(), "fast");
        assert_eq!(ObjectKey::cluster("fast").namespace(), None);
    }

    #[test]
    fn object_key_from_meta_requires_name() {
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
        let meta = ObjectMeta { namespace: Some("a".into()), ..Default::default() };
        assert!(ObjectKey::from_meta(&meta).is_none());
        let meta = ObjectMeta { name: Some("b".into()), namespace: Some("a".into()), ..Default::default() };
        assert_eq!(ObjectKey::from_meta(&meta), Some(ObjectKey::new("a", "b")));
    }
}
